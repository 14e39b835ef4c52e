use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use memory_game::GameEvent;
use tracing::debug;

/// Writes the events of each finished game to its own JSON file.
pub struct Recorder {
    num: usize,
    directory: PathBuf,
    events: Vec<GameEvent>,
}

impl Recorder {
    pub fn new(directory: PathBuf) -> anyhow::Result<Self> {
        if !directory.is_dir() {
            anyhow::bail!("Directory '{}' does not exist", directory.display());
        }
        Ok(Self {
            num: 1,
            directory,
            events: Vec::new(),
        })
    }

    /// Stores `event`, and writes the recording once the game is over.
    ///
    /// A game that is restarted before it ends is not written.
    pub fn observe(&mut self, event: &GameEvent) -> anyhow::Result<()> {
        if let GameEvent::GameStarted { .. } = event {
            self.events.clear();
        }
        self.events.push(event.clone());
        if let GameEvent::GameOver { .. } = event {
            self.write_game_recording()?;
        }
        Ok(())
    }

    pub fn write_game_recording(&mut self) -> anyhow::Result<()> {
        let filepath = self.directory.join(format!("game_{:0>6}.json", self.num));
        let writer = BufWriter::new(File::create(&filepath)?);
        serde_json::to_writer_pretty(writer, &std::mem::take(&mut self.events))?;
        debug!(path = %filepath.display(), "Game recorded");
        self.num += 1;
        Ok(())
    }
}
