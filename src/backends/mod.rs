pub mod capture;
pub mod process;
