//! Small shared utilities.

pub mod html;
