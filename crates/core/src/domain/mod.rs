pub mod client;
pub mod reservation;
pub mod session;
pub mod venue;
