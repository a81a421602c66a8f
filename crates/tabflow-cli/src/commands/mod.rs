pub mod check;
pub mod modules;
pub mod run;
