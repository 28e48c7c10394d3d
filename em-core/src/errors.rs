pub use anyhow::{
    anyhow,
    bail,
    ensure,
};
pub use paste::paste;
pub use thiserror::Error;

/// Result of an operation that only reports success or failure.
pub type EmptyResult = anyhow::Result<()>;

/// Creates an enum deriving `thiserror::Error`, plus a snake-case constructor for each variant
/// that hands back an `anyhow::Error`:
///
/// ```ignore
/// err_impl! {StorageError,
///     #[error("bucket not found: {0}")]
///     BucketNotFound(String),
/// }
///
/// bail!(StorageError::bucket_not_found("photos"));
/// ```
///
/// Crates that invoke it need `thiserror` as a direct dependency, since the derive expands to
/// paths inside that crate.
#[macro_export]
macro_rules! err_impl {
    (@hidden $errtype:ident, $item:ident, String) => {
        $crate::errors::paste! {
            #[doc = concat!("[`", stringify!($errtype), "::", stringify!($item), "`] as an [`anyhow::Error`].")]
            pub fn [<$item:snake>](in_: &str) -> $crate::errors::AnyError {
                $crate::errors::anyhow!{$errtype::$item(in_.into())}
            }
        }
    };

    (@hidden $errtype:ident, $item:ident, $($dtype:tt)::+) => {
        $crate::errors::paste! {
            #[doc = concat!("[`", stringify!($errtype), "::", stringify!($item), "`] as an [`anyhow::Error`].")]
            pub fn [<$item:snake>](in_: &$($dtype)::+) -> $crate::errors::AnyError {
                $crate::errors::anyhow!{$errtype::$item(in_.clone())}
            }
        }
    };

    ($errtype:ident,
        $(#[$errinfo:meta] $item:ident($($dtype:tt)::+),)+
    ) => {
        // Each variant is described by its `#[error]` message.
        #[allow(missing_docs)]
        #[derive(Debug, $crate::errors::Error)]
        pub enum $errtype {
            $(#[$errinfo] $item($($dtype)::+)),+
        }

        impl $errtype {
            $($crate::err_impl! {@hidden $errtype, $item, $($dtype)::+})+
        }
    };
}

/// Type-erased error every `err_impl!` constructor returns.
pub use anyhow::Error as AnyError;
