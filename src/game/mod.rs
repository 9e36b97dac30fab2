pub mod commands;
pub mod constants;
pub mod game_loop;
pub mod generator;
pub mod input_buffer;
pub mod map;
pub mod state;
pub mod systems;
pub mod world;
