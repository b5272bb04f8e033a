use std::io::{self, BufRead, BufReader, Read};

/// Incremental line reader over a child's merged output.
///
/// `\n`, `\r\n` and a lone `\r` all end a line, so carriage-return progress
/// redraws come through as soon as they are written instead of piling up
/// until the next newline. Invalid UTF-8 is replaced, not rejected.
pub struct OutputLines<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    skip_lf: bool,
    done: bool,
}

impl<R: Read> OutputLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            skip_lf: false,
            done: false,
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

impl<R: Read> Iterator for OutputLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let buf = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if buf.is_empty() {
                self.done = true;
                if self.pending.is_empty() {
                    return None;
                }
                return Some(Ok(self.take_line()));
            }

            let mut consumed = 0;
            let mut line_ready = false;
            for &byte in buf {
                consumed += 1;
                if self.skip_lf {
                    self.skip_lf = false;
                    if byte == b'\n' {
                        continue;
                    }
                }
                match byte {
                    b'\n' => {
                        line_ready = true;
                        break;
                    }
                    b'\r' => {
                        self.skip_lf = true;
                        line_ready = true;
                        break;
                    }
                    _ => self.pending.push(byte),
                }
            }
            self.reader.consume(consumed);

            if line_ready {
                return Some(Ok(self.take_line()));
            }
        }
    }
}
