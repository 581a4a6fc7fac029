// Defines some macros like the std `print*!`. The output goes to the kernel log buffer.

#[macro_export]
macro_rules! print_k {
    ($($args:tt)+) => ({
        $crate::logk::print_fmt(format_args!($($args)+));
    });
}

#[macro_export]
macro_rules! println_k {
    () => {
        $crate::print_k!("\n")
    };
    ($fmt:expr) => {
        $crate::print_k!(concat!($fmt, "\n"))
    };
    ($fmt:expr, $($args:tt)+) => {
        $crate::print_k!(concat!($fmt, "\n"), $($args)+)
    };
}
