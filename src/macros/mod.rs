#[macro_use]
mod print;
