#![allow(dead_code)]

pub mod log_capture;
pub mod mock_server;
