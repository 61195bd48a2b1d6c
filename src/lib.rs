//! crabsd - SD card block driver for STM32 SDMMC hosts
//!
//! Brings a removable SD card from insertion to a ready 512-byte block device
//! and moves blocks with the SDMMC internal DMA. GPIO, clocks, interrupt
//! routing and waiting are provided by the firmware through the traits in
//! [`board`] and [`time`].

#![cfg_attr(not(test), no_std)]

pub mod board;
pub mod drivers;
pub mod logger;
pub mod time;

pub use drivers::sdmmc::{
    CardInfo, InitError, InitPhase, SdCard, SdError, Sdmmc, SdmmcConfig, SdmmcHost,
};
