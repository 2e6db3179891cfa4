pub mod git;
pub mod pktline;
