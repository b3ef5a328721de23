//! Rotation/mirror state and its textual transformation descriptor.

const ROTATIONS: [&str; 4] = ["", "ccw", "turn", "cw"];
const MIRRORS: [&str; 4] = ["", "tb", "lr", "tb lr"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    CounterClockwise,
    Clockwise,
}

impl Rotation {
    fn step(self) -> u8 {
        match self {
            Rotation::CounterClockwise => 1,
            Rotation::Clockwise => 3,
        }
    }
}

/// Mirror bits as toggled by the mirror buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
    TopBottom = 1,
    LeftRight = 2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformState {
    rotation: u8,
    mirror: u8,
}

impl TransformState {
    pub fn rotation_index(&self) -> u8 {
        self.rotation
    }

    pub fn mirror_mask(&self) -> u8 {
        self.mirror
    }

    /// `(current + dir + 4) mod 4`; counterclockwise is `+1`.
    pub fn rotate(&mut self, direction: Rotation) {
        self.rotation = (self.rotation + direction.step()) % 4;
    }

    pub fn toggle_mirror(&mut self, bit: Mirror) {
        self.mirror ^= bit as u8;
    }

    pub fn transformation(&self) -> String {
        let rotation = ROTATIONS[usize::from(self.rotation)];
        let mirror = MIRRORS[usize::from(self.mirror)];
        format!("{rotation} {mirror}").trim().to_string()
    }
}
