//! Security subsystem.
//!
//! # Responsibilities
//! - Keep connection handlers from ever running as superuser
//! - Permanent, one-way identity change inside connection processes

pub mod privilege;

pub use privilege::{drop_privileges, verify_startup_identity, Credentials, PrivilegeError};
