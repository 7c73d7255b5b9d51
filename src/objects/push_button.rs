//! Push button object (OID 3347)

use super::DataObject;
use crate::engine::Client;
use anyhow::Result;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

pub const OID_PUSH_BUTTON: u16 = 3347;
pub const RID_DIGITAL_INPUT_STATE: u16 = 5500;
pub const RID_DIGITAL_INPUT_COUNTER: u16 = 5501;

#[derive(Debug, Default, Clone, Copy)]
struct Reported {
    pressed: bool,
    counter: u64,
}

/// Button state is pushed in from input handling and reported on update
#[derive(Default)]
pub struct PushButtonObject {
    pressed: AtomicBool,
    presses: Mutex<u64>,
    reported: Mutex<Option<Reported>>,
}

impl PushButtonObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pressed(&self, pressed: bool) {
        let was = self.pressed.swap(pressed, Ordering::SeqCst);
        if pressed && !was {
            *self.presses.lock().unwrap() += 1;
        }
    }

    pub fn presses(&self) -> u64 {
        *self.presses.lock().unwrap()
    }
}

impl DataObject for PushButtonObject {
    fn oid(&self) -> u16 {
        OID_PUSH_BUTTON
    }

    fn name(&self) -> &str {
        "Push button"
    }

    fn update(&self, client: &dyn Client) -> Result<()> {
        let current = Reported {
            pressed: self.pressed.load(Ordering::SeqCst),
            counter: self.presses(),
        };
        let previous = self.reported.lock().unwrap().replace(current);

        if previous.is_none_or(|p| p.pressed != current.pressed) {
            client.notify_changed(OID_PUSH_BUTTON, RID_DIGITAL_INPUT_STATE);
        }
        if previous.is_none_or(|p| p.counter != current.counter) {
            client.notify_changed(OID_PUSH_BUTTON, RID_DIGITAL_INPUT_COUNTER);
        }
        Ok(())
    }
}
