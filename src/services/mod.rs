// Services module - scanner registry, merge engine and metadata sources

pub mod merge;
pub mod registry;

// Metadata scanners
pub mod anilist;
pub mod tmdb;
