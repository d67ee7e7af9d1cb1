//! The pad surface: grid geometry, raw message framing, and LED painting.
//!
//! The hardware exposes an 8x8 pad grid (note rows 81..88 down to 11..18),
//! a control row addressed by CC (91..98), and a scene column
//! (89, 79, .. 19). LEDs are set by sending a note-on (or CC for the
//! control row) whose velocity byte selects a palette color.
//!
//! Painting keeps a shadow of the last velocity sent per pad and skips
//! sends that would not change anything, so animations can repaint frames
//! cheaply (delta painting).

use std::{collections::HashMap, sync::Arc};

use config::Mapping;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{Error, Result, deps::OutputPort};

/// Status byte for note-on messages (channel 1).
pub const NOTE_ON: u8 = 0x90;
/// Status byte for note-off messages (channel 1).
pub const NOTE_OFF: u8 = 0x80;
/// Status byte for control-change messages (channel 1).
pub const CONTROL_CHANGE: u8 = 0xB0;

/// Sysex that switches the device into programmer mode, where every pad
/// is individually addressable.
pub const PROGRAMMER_MODE_INIT: &[u8] = &[0xF0, 0x00, 0x20, 0x29, 0x02, 0x0D, 0x0E, 0x01, 0xF7];

/// Control ids of the top control row (CC-addressed).
pub const CONTROL_NOTES: [u8; 8] = [91, 92, 93, 94, 95, 96, 97, 98];
/// Control ids of the right-hand scene column, top to bottom.
pub const SCENE_NOTES: [u8; 8] = [89, 79, 69, 59, 49, 39, 29, 19];

/// The 8x8 grid, row by row from the top: 81..88, 71..78, .. 11..18.
pub fn grid_notes() -> [[u8; 8]; 8] {
    let mut rows = [[0u8; 8]; 8];
    for (i, row) in rows.iter_mut().enumerate() {
        let base = (8 - i as u8) * 10 + 1;
        for (j, note) in row.iter_mut().enumerate() {
            *note = base + j as u8;
        }
    }
    rows
}

/// Every addressable control id: grid, control row, scene column.
pub fn all_notes() -> Vec<u8> {
    let mut notes: Vec<u8> = grid_notes().into_iter().flatten().collect();
    notes.extend_from_slice(&CONTROL_NOTES);
    notes.extend_from_slice(&SCENE_NOTES);
    notes
}

/// True for pads addressed by CC rather than note messages.
pub fn is_control_note(note: u8) -> bool {
    (91..=98).contains(&note)
}

/// Shared handle to the output side of the connection.
#[derive(Clone, Default)]
pub struct Surface {
    inner: Arc<Mutex<SurfaceInner>>,
}

#[derive(Default)]
struct SurfaceInner {
    output: Option<Box<dyn OutputPort>>,
    shadow: HashMap<u8, u8>,
}

impl Surface {
    /// A surface with no output attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach or detach the output port. The shadow is cleared either way:
    /// after a (re)connect the device's LED state is unknown.
    pub fn set_output(&self, output: Option<Box<dyn OutputPort>>) {
        let mut inner = self.inner.lock();
        inner.output = output;
        inner.shadow.clear();
    }

    /// True when an output port is attached.
    pub fn is_connected(&self) -> bool {
        self.inner.lock().output.is_some()
    }

    /// Send a raw message to the device.
    pub fn send(&self, message: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.output.as_mut() {
            Some(out) => out.send(message),
            None => Err(Error::NotConnected),
        }
    }

    /// Switch the device into programmer mode.
    pub fn init_device(&self) -> Result<()> {
        debug!("initializing device display mode");
        self.send(PROGRAMMER_MODE_INIT)?;
        Ok(())
    }

    /// Set one pad's LED to the given palette velocity, skipping the send
    /// when the pad already shows that velocity.
    pub fn light(&self, note: u8, velocity: u8) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.shadow.get(&note) == Some(&velocity) {
            return Ok(());
        }
        let status = if is_control_note(note) {
            CONTROL_CHANGE
        } else {
            NOTE_ON
        };
        let out = inner.output.as_mut().ok_or(Error::NotConnected)?;
        out.send(&[status, note, velocity])?;
        inner.shadow.insert(note, velocity);
        Ok(())
    }

    /// Turn every pad off.
    pub fn clear_all(&self) -> Result<()> {
        trace!("surface_clear_all");
        for note in all_notes() {
            self.light(note, 0)?;
        }
        Ok(())
    }

    /// Paint a layer: every pad shows its enabled mapping's color, all
    /// others go dark. The shadow turns this into a delta paint.
    pub fn paint_mappings<'a>(&self, mappings: impl Iterator<Item = &'a Mapping>) -> Result<()> {
        let desired: HashMap<u8, u8> = mappings
            .filter(|m| m.enabled)
            .map(|m| (m.note, m.color.velocity()))
            .collect();
        for note in all_notes() {
            self.light(note, desired.get(&note).copied().unwrap_or(0))?;
        }
        Ok(())
    }
}
