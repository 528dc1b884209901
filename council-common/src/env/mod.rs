pub mod ballot;
pub mod guardian;
pub mod legacy;
pub mod petition;
pub mod snapshot;
