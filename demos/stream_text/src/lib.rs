//! Output plugin writing observations as tab separated text.
//!
//! Build it and copy the resulting library into a directory given with
//! `--path-stream`, then name it as the plugin of a view:
//!
//! ```xml
//! <view name="trace" plugin="stream_text" location="/tmp/trace.txt" />
//! ```
//!
//! An empty location keeps the lines in memory and hands them back as the
//! view output when the stream closes.

#[macro_use]
extern crate log;

use std::fs::File;
use std::io::{BufWriter, Write};

use simbatch_core::{declare_output_plugin, Error, OutputPlugin, Result, Value};

declare_output_plugin!(TextStream::new);

pub struct TextStream {
    file: Option<BufWriter<File>>,
    lines: Vec<Value>,
}

impl TextStream {
    pub fn new(location: &str) -> Option<TextStream> {
        let file = if location.is_empty() {
            None
        } else {
            match File::create(location) {
                Ok(f) => Some(BufWriter::new(f)),
                Err(e) => {
                    error!("stream_text: can't create {}: {}", location, e);
                    return None;
                }
            }
        };
        Some(TextStream {
            file,
            lines: Vec::new(),
        })
    }

    fn write_line(&mut self, line: String) -> Result<()> {
        match &mut self.file {
            Some(file) => writeln!(file, "{}", line).map_err(Error::from),
            None => {
                self.lines.push(Value::String(line));
                Ok(())
            }
        }
    }
}

impl OutputPlugin for TextStream {
    fn on_parameter(&mut self, view: &str, _location: &str) -> Result<()> {
        self.write_line(format!("# view {}", view))
    }

    fn on_new_observable(&mut self, _view: &str, port: &str, time: f64) -> Result<()> {
        self.write_line(format!("# {}\t{}", time, port))
    }

    fn on_value(&mut self, _view: &str, port: &str, time: f64, value: &Value) -> Result<()> {
        self.write_line(format!("{}\t{}\t{}", time, port, value.to_text()))
    }

    fn close(&mut self, time: f64) -> Result<Option<Value>> {
        self.write_line(format!("# end {}", time))?;
        match self.file.take() {
            Some(mut file) => {
                file.flush()?;
                Ok(None)
            }
            None => Ok(Some(Value::Set(std::mem::take(&mut self.lines)))),
        }
    }
}
