pub mod fade_engine;
