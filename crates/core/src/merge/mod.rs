pub mod channel_merger;
