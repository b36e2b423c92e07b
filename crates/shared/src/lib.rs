pub mod domain;
pub mod error;
pub mod pricing;
pub mod protocol;
pub mod steps;
