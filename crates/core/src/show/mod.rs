pub mod show_store;
