// private sub-module defined in other files
mod nelder_mead;

// exports identifiers from private sub-modules in the current module namespace
pub use self::nelder_mead::minimize;
pub use self::nelder_mead::NelderMeadOptions;
pub use self::nelder_mead::NelderMeadResult;
