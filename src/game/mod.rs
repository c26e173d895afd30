pub mod entity;
pub mod pool;
pub mod world;
