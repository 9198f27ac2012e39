// Domain layers: tasks, workers, endpoint configs + scaling events.

pub mod endpoints;
pub mod tasks;
pub mod workers;
