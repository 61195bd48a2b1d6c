//! Hardware drivers

pub mod sdmmc;
