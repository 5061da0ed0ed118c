pub mod broadcast;
pub mod engines;
pub mod player;
pub mod poller;
