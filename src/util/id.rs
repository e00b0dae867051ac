//! Macro for ID newtypes.

macro_rules! make_id {
    ($(#[$meta:meta])* $vis:vis $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis struct $name(usize);

        impl $name {
            /// A fresh ID, never handed out before in this process.
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                static NEXT: core::sync::atomic::AtomicUsize =
                    core::sync::atomic::AtomicUsize::new(1);
                Self(NEXT.fetch_add(1, core::sync::atomic::Ordering::Relaxed))
            }

            pub const fn raw(&self) -> usize {
                self.0
            }
        }
    };
}
