//! Kernel error definitions.
//!
//! Every fallible subsystem declares its error enum through
//! [`define_kernel_error!`], which gives each variant a stable 16-bit code
//! (`subsystem << 8 | variant`) that can be printed on a dead machine and
//! decoded again later with `from_code`.
//!
//! ```ignore
//! define_kernel_error! {
//!     pub enum GateError(0x01) {
//!         VectorOutOfRange = 0x01 => "Vector outside the gate table",
//!         TableLive = 0x02 => "Gate table is live",
//!     }
//! }
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

/// Declares a fieldless error enum with numbered variants.
///
/// Generated items: `SUBSYSTEM`, `ALL`, `code()`, `name()`, `from_code()`,
/// `Display` (`E{code:04X}: {name}`) and `core::error::Error`.
#[macro_export]
macro_rules! define_kernel_error {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident($subsystem:literal) {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident = $code:literal => $desc:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant,
            )*
        }

        impl $name {
            /// Subsystem byte shared by every variant.
            pub const SUBSYSTEM: u8 = $subsystem;

            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),*];

            pub const fn code(&self) -> u16 {
                match self {
                    $(Self::$variant => (($subsystem as u16) << 8) | $code,)*
                }
            }

            pub const fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $desc,)*
                }
            }

            /// Inverse of [`Self::code`]. Codes from another subsystem never match.
            pub const fn from_code(code: u16) -> Option<Self> {
                if (code >> 8) as u8 != $subsystem {
                    return None;
                }
                match (code & 0xFF) as u8 {
                    $($code => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "E{:04X}: {}", self.code(), self.name())
            }
        }

        impl core::error::Error for $name {}
    };
}
