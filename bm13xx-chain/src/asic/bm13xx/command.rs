//! The command catalog: named chain operations and their frames.
//!
//! Each command maps to a fixed header and a payload shape. Register writes
//! share one layout, `[chip_address, register, data0..data3]`; broadcast
//! writes put 0 in the chip address slot.

use bytes::{BufMut, BytesMut};

use super::frame::{Frame, Group, Header, Operation};
use super::register::{
    BaudRate, DifficultyMask, Frequency, Register, RegisterAddress, VersionMask,
};

/// Which chips a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Broadcast,
    Chip(u8),
}

impl Target {
    fn group(&self) -> Group {
        match self {
            Target::Broadcast => Group::All,
            Target::Chip(_) => Group::Single,
        }
    }

    fn chip_address(&self) -> u8 {
        match self {
            Target::Broadcast => 0,
            Target::Chip(address) => *address,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainCommand {
    /// Configure the version-rolling mask on every chip.
    SetVersionMask(VersionMask),
    /// Put every chip in a state where it accepts a new address.
    ChainInactive,
    /// Give the next unaddressed chip on the chain this address.
    SetAddress { chip_address: u8 },
    ReadRegister {
        target: Target,
        register: RegisterAddress,
    },
    WriteRegister {
        target: Target,
        register: Register,
    },
    /// Nonce-acceptance threshold for every chip.
    SetDifficultyMask(DifficultyMask),
    /// Program every chip's PLL for this frequency.
    SetFrequency(Frequency),
    /// Switch every chip's UART to a new rate.
    SetBaud(BaudRate),
}

impl ChainCommand {
    pub fn header(&self) -> Header {
        match self {
            ChainCommand::ChainInactive => Header::command(Group::All, Operation::Inactive),
            ChainCommand::SetAddress { .. } => {
                Header::command(Group::Single, Operation::SetAddress)
            }
            ChainCommand::ReadRegister { target, .. } => {
                Header::command(target.group(), Operation::Read)
            }
            ChainCommand::WriteRegister { target, .. } => {
                Header::command(target.group(), Operation::Write)
            }
            ChainCommand::SetVersionMask(_)
            | ChainCommand::SetDifficultyMask(_)
            | ChainCommand::SetFrequency(_)
            | ChainCommand::SetBaud(_) => Header::command(Group::All, Operation::Write),
        }
    }

    pub fn payload(&self) -> BytesMut {
        let mut dst = BytesMut::with_capacity(6);
        match self {
            ChainCommand::ChainInactive => {
                dst.put_u8(0x00);
                dst.put_u8(0x00);
            }
            ChainCommand::SetAddress { chip_address } => {
                dst.put_u8(*chip_address);
                dst.put_u8(0x00);
            }
            ChainCommand::ReadRegister { target, register } => {
                dst.put_u8(target.chip_address());
                dst.put_u8(*register as u8);
            }
            ChainCommand::WriteRegister { target, register } => {
                put_register(&mut dst, *target, register);
            }
            ChainCommand::SetVersionMask(mask) => {
                put_register(&mut dst, Target::Broadcast, &Register::VersionMask(*mask));
            }
            ChainCommand::SetDifficultyMask(mask) => {
                put_register(&mut dst, Target::Broadcast, &Register::TicketMask(*mask));
            }
            ChainCommand::SetFrequency(frequency) => {
                let pll = frequency.calculate_pll();
                put_register(&mut dst, Target::Broadcast, &Register::PllDivider(pll));
            }
            ChainCommand::SetBaud(baud) => {
                put_register(&mut dst, Target::Broadcast, &Register::UartBaud(*baud));
            }
        }
        dst
    }

    pub fn to_frame(&self) -> Frame {
        Frame::new(self.header(), self.payload().freeze())
    }
}

fn put_register(dst: &mut BytesMut, target: Target, register: &Register) {
    dst.put_u8(target.chip_address());
    dst.put_u8(register.address() as u8);
    dst.put_slice(&register.data());
}
