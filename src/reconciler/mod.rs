pub mod events;
pub mod poll_loop;
pub mod status;
pub mod supervisor;
