mod config;
mod driver;
mod kernel;
mod lenses;
mod materialization;
mod neighbors;
