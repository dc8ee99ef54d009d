pub mod address_allocator;
