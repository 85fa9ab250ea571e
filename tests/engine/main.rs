mod common;

mod create_write;
mod handle_ops;
mod metadata_ops;
mod rename_ops;
mod sidecar_ops;
mod symlink_ops;
