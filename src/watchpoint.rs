// Watchpoint pool: a fixed array of slots plus a free-index stack. An id is
// the slot index and stays valid until the user deletes it.

pub const NR_WP: usize = 32;

pub struct Watchpoint {
    pub expr: String,
    pub old_value: u32,
    pub enabled: bool,
}

pub struct WatchPool {
    slots: Vec<Option<Watchpoint>>,
    free: Vec<usize>,
}

impl WatchPool {
    pub fn new() -> Self {
        WatchPool {
            slots: (0..NR_WP).map(|_| None).collect(),
            free: (0..NR_WP).rev().collect(),
        }
    }

    // The expression must already have evaluated successfully; its value is
    // the snapshot future checks compare against.
    pub fn set(&mut self, expr: &str, value: u32) -> Option<usize> {
        let id = self.free.pop()?;
        self.slots[id] = Some(Watchpoint {
            expr: expr.to_string(),
            old_value: value,
            enabled: true,
        });
        Some(id)
    }

    pub fn delete(&mut self, id: usize) -> bool {
        if id >= NR_WP {
            return false;
        }
        if self.slots[id].take().is_some() {
            self.free.push(id);
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: usize) -> Option<&Watchpoint> {
        self.slots.get(id).and_then(|slot| slot.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Watchpoint)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|wp| (id, wp)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Watchpoint)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_mut().map(|wp| (id, wp)))
    }

    pub fn is_empty(&self) -> bool {
        self.free.len() == NR_WP
    }

    pub fn list(&self) {
        if self.is_empty() {
            println!("No watchpoints");
            return;
        }
        println!("Num     Type           Disp Enb Address    What");
        for (id, wp) in self.iter() {
            if wp.enabled {
                println!(
                    "{:<8}watchpoint     keep y               {} = 0x{:x}",
                    id, wp.expr, wp.old_value
                );
            }
        }
    }
}
