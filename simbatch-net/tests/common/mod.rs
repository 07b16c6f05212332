#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use simbatch_core::{Experiment, JobSet};

/// Writes one experiment file per name and resolves them as a job set.
pub fn write_experiments(dir: &Path, names: &[&str]) -> JobSet {
    for name in names {
        let mut experiment = Experiment::new(name.trim_end_matches(".exp"), 10.).unwrap();
        experiment.set_condition_port("init", "x", simbatch_core::Value::Integer(1));
        experiment.write_to(&dir.join(name)).unwrap();
    }
    JobSet::from_args(names, dir, None).unwrap()
}

/// Reads a whole frame from a plain stream, as a misbehaving peer would
/// before answering.
pub fn read_raw_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0; 4];
    stream.read_exact(&mut header).unwrap();
    let mut body = vec![0; LittleEndian::read_u32(&header) as usize];
    stream.read_exact(&mut body).unwrap();
    body
}

pub fn write_raw(stream: &mut TcpStream, announced_len: u32, body: &[u8]) {
    let mut header = [0; 4];
    LittleEndian::write_u32(&mut header, announced_len);
    stream.write_all(&header).unwrap();
    stream.write_all(body).unwrap();
    stream.flush().unwrap();
}
