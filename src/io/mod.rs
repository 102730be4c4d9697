/// CSV export of monitor output.
pub mod export;
