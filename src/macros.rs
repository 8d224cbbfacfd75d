//! # Internal Macros
//!
//! ## le_fields!
//!
//! On-disk headers in fanspool store integers as zerocopy little-endian
//! wrappers (U32/U64), which are unaligned and byte-order stable but clumsy
//! to use directly. `le_fields!` generates native-typed accessors for them:
//! every listed field gets a getter, and fields marked `mut` also get a
//! setter, so headers that are only ever parsed stay setter-free.
//!
//! ```ignore
//! use zerocopy::little_endian::{U32, U64};
//!
//! #[repr(C)]
//! struct Header {
//!     version: U32,
//!     record_count: U64,
//! }
//!
//! impl Header {
//!     le_fields! {
//!         version: u32,
//!         mut record_count: u64,
//!     }
//! }
//!
//! // header.version() -> u32
//! // header.record_count() -> u64
//! // header.set_record_count(7)
//! ```
//!
//! Conversion goes through the wrappers' `get()` and `From` impls, so a
//! single rule covers every width.

/// Generates native-typed accessors for zerocopy little-endian fields.
/// Fields marked `mut` also get a `set_` method. Every entry needs a
/// trailing comma.
#[macro_export]
macro_rules! le_fields {
    () => {};
    (mut $field:ident: $ty:ty, $($rest:tt)*) => {
        #[inline]
        pub fn $field(&self) -> $ty {
            self.$field.get()
        }

        ::paste::paste! {
            #[inline]
            pub fn [<set_ $field>](&mut self, val: $ty) {
                self.$field = val.into();
            }
        }

        $crate::le_fields!($($rest)*);
    };
    ($field:ident: $ty:ty, $($rest:tt)*) => {
        #[inline]
        pub fn $field(&self) -> $ty {
            self.$field.get()
        }

        $crate::le_fields!($($rest)*);
    };
}
