pub mod filewatch;
pub mod firewall;
pub mod netwatch;
