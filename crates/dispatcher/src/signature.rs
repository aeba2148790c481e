//! Signatures: zero-sized tag types that key the registries
//!
//! A signature names a call or an event and fixes its argument tuple and
//! return type at compile time. Handlers, callers and subscribers are all
//! checked against it.
//!
//! ```rust,ignore
//! signature!(HelloWorld);                          // () -> ()
//! signature!(pub Addition(i32, i32) -> i32);
//! signature!(ModifyString<'a>(&'a mut String));    // reference arguments
//! ```

/// Compile-time descriptor of a callable slot
pub trait Signature: 'static {
    /// Argument tuple; the lifetime lets arguments borrow from the caller
    type Args<'a>;

    /// Return type of the attached handler
    type Output: 'static;

    /// Name used in logs and `NoHandler` errors
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Declare a signature tag type.
///
/// Arguments default to none and the return type to `()`.
#[macro_export]
macro_rules! signature {
    (@define [$($meta:tt)*] $vis:vis $name:ident [$lt:lifetime] [$($arg:ty),*] [$($out:ty)?]) => {
        $($meta)*
        #[derive(Debug, Clone, Copy, Default)]
        $vis struct $name;

        impl $crate::Signature for $name {
            type Args<$lt> = ($($arg,)*);
            type Output = $crate::signature!(@output $($out)?);
        }
    };
    (@output) => { () };
    (@output $out:ty) => { $out };

    ($(#[$meta:meta])* $vis:vis $name:ident <$lt:lifetime> $(($($arg:ty),* $(,)?))? $(-> $out:ty)?) => {
        $crate::signature!(@define [$(#[$meta])*] $vis $name [$lt] [$($($arg),*)?] [$($out)?]);
    };
    ($(#[$meta:meta])* $vis:vis $name:ident $(($($arg:ty),* $(,)?))? $(-> $out:ty)?) => {
        $crate::signature!(@define [$(#[$meta])*] $vis $name ['a] [$($($arg),*)?] [$($out)?]);
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::TypeId;

    crate::signature!(Ping);
    crate::signature!(pub Sum(u32, u32) -> u64);
    crate::signature!(Borrowing<'a>(&'a str, usize) -> &'static str);

    fn args_of<S: Signature>(args: S::Args<'_>) -> S::Args<'_> {
        args
    }

    #[test]
    fn test_defaults() {
        assert_eq!(TypeId::of::<<Ping as Signature>::Output>(), TypeId::of::<()>());
        let () = args_of::<Ping>(());
        assert!(Ping::name().ends_with("Ping"));
    }

    #[test]
    fn test_args_and_output() {
        let (a, b) = args_of::<Sum>((1, 2));
        assert_eq!(a + b, 3);
        assert_eq!(TypeId::of::<<Sum as Signature>::Output>(), TypeId::of::<u64>());
    }

    #[test]
    fn test_borrowed_args() {
        let owned = String::from("abc");
        let (s, n) = args_of::<Borrowing>((&owned, 1));
        assert_eq!(&s[n..], "bc");
    }

    #[test]
    fn test_distinct_tags() {
        assert_ne!(TypeId::of::<Ping>(), TypeId::of::<Sum>());
    }
}
