//! Thin adapter around the installed `git` binary.
//!
//! Every operation here shells out; none of them touch the git object model
//! directly. Higher layers (the ref engine, the LFS agent) depend only on
//! the functions re-exported from [`interop`].

mod interop;
mod lowlevel;
mod types;

pub use interop::{
    archive, bundle, config_add, config_unset, get_config, get_last_commit_message,
    get_lfsconfig, get_repository_root, is_ancestor, rev_parse, unbundle, validate_ref_name,
};
pub use types::GitError;
