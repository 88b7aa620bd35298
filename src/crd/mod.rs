mod xtradb_backup;
mod xtradb_cluster;

pub use xtradb_backup::*;
pub use xtradb_cluster::*;
