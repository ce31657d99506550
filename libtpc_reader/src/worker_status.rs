/// Color of the progress bar, one per stage of the work
#[derive(Debug, Clone, Default, PartialEq)]
pub enum BarColor {
    #[default]
    CYAN,
    MAGENTA,
    RED,
    GREEN,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    /// Events handed to the sink so far
    pub events: usize,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(progress: f32, events: usize, color: BarColor) -> Self {
        Self {
            progress,
            events,
            color,
        }
    }
}
