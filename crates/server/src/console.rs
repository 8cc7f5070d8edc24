use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver};
use std::thread;

/// Admin commands typed on stdin, read on a background thread so the
/// server loop never blocks on the terminal.
pub struct Console {
    lines: Receiver<String>,
}

impl Console {
    pub fn spawn() -> Self {
        let (sender, lines) = mpsc::channel();
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        log::warn!("Console input failed: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                if sender.send(line).is_err() {
                    break;
                }
            }
        });
        Self { lines }
    }

    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.lines.try_iter()
    }
}
