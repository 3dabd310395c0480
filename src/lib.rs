// src/lib.rs

pub mod chain;
pub mod config;
pub mod controller;
pub mod effective_field;
pub mod energy;
pub mod llg;
pub mod params;
pub mod spectrum;
pub mod vec3;
pub mod visualisation;
