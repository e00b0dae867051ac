//! Boilerplate for singleton types.

macro_rules! singleton {
    ($name:ident, $t:ty, $init:expr) => {
        static $name: std::sync::OnceLock<$t> = std::sync::OnceLock::new();
        impl $t {
            /// The process-wide instance.
            pub fn the() -> &'static Self {
                $name.get_or_init(|| $init)
            }
        }
    };

    ($name:ident, $t:ty) => {
        singleton!($name, $t, <$t>::default());
    };
}
