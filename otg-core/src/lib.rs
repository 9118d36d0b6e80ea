#![no_std]

// Dual-role USB port negotiation shared by the firmware and host tooling.
//
// The engine only talks to hardware through the collaborator traits in
// `port`, so the same state machine runs on the MCU and inside the emulator.

pub mod fsm;
pub mod outputs;
pub mod port;
pub mod repl;
pub mod signals;
pub mod telemetry;
pub mod timers;
