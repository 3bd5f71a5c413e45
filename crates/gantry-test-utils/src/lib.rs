//! Test doubles for driving the gantry protocol cores without hardware
//! or a firmware build: a scripted SPI peer and a canned machine
//! backend.

mod fake_machine;
mod scripted_bus;

pub use fake_machine::FakeMachine;
pub use scripted_bus::ScriptedSpiBus;
