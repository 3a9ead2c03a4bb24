//! Source breakpoints and the cursor of the run-to-breakpoint pump.

use crate::arg::Location;

/// Ordered breakpoint locations plus the index of the breakpoint the debugger
/// currently rests at. The cursor ranges over `[-1, len]`: `-1` means "before
/// the first breakpoint", `len` "past the last".
#[derive(Debug)]
pub struct BreakpointRegistry {
    locations: Vec<Location>,
    active: i64,
}

impl BreakpointRegistry {
    pub fn new() -> BreakpointRegistry {
        BreakpointRegistry {
            locations: Vec::new(),
            active: -1,
        }
    }

    /// Replace all breakpoints belonging to `file`, keeping the rest.
    pub fn replace_file(&mut self, file: &str, locations: Vec<Location>) {
        self.locations.retain(|b| b.file != file);
        self.locations.extend(locations);
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn reset_cursor(&mut self) {
        self.active = -1;
    }

    pub fn cursor(&self) -> i64 {
        self.active
    }

    /// Move the cursor one breakpoint in `direction` (1 or -1); false when the
    /// move would leave the pump range. With no breakpoints set there is one
    /// synthetic slot (the program entry).
    pub fn step_cursor(&mut self, direction: i64) -> bool {
        let next = self.active + direction;
        if next >= 0 && next < std::cmp::max(1, self.locations.len() as i64) {
            self.active = next;
            true
        } else {
            false
        }
    }

    /// Location under the cursor; `None` when no breakpoints are set.
    pub fn active_location(&self) -> Option<&Location> {
        usize::try_from(self.active)
            .ok()
            .and_then(|index| self.locations.get(index))
    }
}

impl Default for BreakpointRegistry {
    fn default() -> BreakpointRegistry {
        BreakpointRegistry::new()
    }
}
