pub mod fd_limit;

pub use fd_limit::{FDS_PER_WORKER, max_open_fds, max_workers_by_fd_limit};
