//! Demo binary exercising the library as either a master or a slave, over
//! RTU or TCP, driven by a layered [`StationConfig`] the same way the
//! teacher's `main.rs` drives its relay from a `RelayConfig`. Out of scope
//! for the library core itself — this is example/glue code.

use std::cell::RefCell;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;

use modbus_station::{
    Callbacks, ExceptionCode, Master, Protocol, SerialTransport, Slave, StationConfig, TcpTransport,
    Transport,
};

#[derive(Copy, Clone, ValueEnum)]
enum Role {
    Master,
    Slave,
}

#[derive(Parser)]
#[command(author, version, about = "Modbus master/slave demo station")]
struct Cli {
    /// Path to a station config file; falls back to env-var/default-file layering when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dump the default configuration as YAML and exit.
    #[arg(long = "dump-default-config")]
    dump_default: bool,

    /// Run as a master (reads ten holding registers once) or a slave (serves requests).
    #[arg(long, value_enum, default_value_t = Role::Slave)]
    role: Role,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.dump_default {
        println!("{}", serde_yaml::to_string(&StationConfig::default())?);
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => StationConfig::from_file(path)?,
        None => StationConfig::layered()?,
    };

    modbus_station::logging::setup_logging(&config.logging)?;

    match cli.role {
        Role::Master => run_master(&config),
        Role::Slave => run_slave(&config),
    }
}

fn run_master(config: &StationConfig) -> Result<(), Box<dyn std::error::Error>> {
    match config.master.protocol {
        Protocol::Tcp => {
            let transport = TcpTransport::connect(config.tcp.host.clone(), config.tcp.port, config.tcp.connect_timeout);
            poll_once(Master::new(transport, &config.master))
        }
        Protocol::Rtu => {
            let transport = SerialTransport::new(config.rtu.clone());
            poll_once(Master::new(transport, &config.master))
        }
    }
}

fn poll_once<T: Transport>(mut master: Master<T>) -> Result<(), Box<dyn std::error::Error>> {
    master.open()?;
    let mut regs = [0u16; 10];
    match master.read_holding_registers(0, regs.len() as u16, &mut regs) {
        Ok(n) => info!(count = n, ?regs, "read holding registers"),
        Err(e) => info!(error = %e, "master read failed"),
    }
    Ok(())
}

fn run_slave(config: &StationConfig) -> Result<(), Box<dyn std::error::Error>> {
    match config.slave.protocol {
        Protocol::Tcp => {
            info!(host = %config.tcp.host, port = config.tcp.port, "connecting out to serve a TCP peer");
            let stream = std::net::TcpStream::connect((config.tcp.host.as_str(), config.tcp.port))?;
            serve(TcpTransport::from_std(stream)?, config)
        }
        Protocol::Rtu => serve(SerialTransport::new(config.rtu.clone()), config),
    }
}

/// Serves requests against a small in-memory register/coil file, standing
/// in for whatever data store a real embedding application would back the
/// callback table with (spec.md §1: out of scope for the core itself).
fn serve<T: Transport>(transport: T, config: &StationConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut slave = Slave::new(transport, &config.slave);
    slave.open()?;

    let registers = RefCell::new(vec![0u16; 100]);
    let coils = RefCell::new(vec![false; 100]);

    loop {
        let mut callbacks = Callbacks::new()
            .on_read_holding_registers(|addr, qty| read_regs(&registers, addr, qty))
            .on_read_input_registers(|addr, qty| read_regs(&registers, addr, qty))
            .on_write_holding_registers(|addr, values| write_regs(&registers, addr, values))
            .on_read_coils(|addr, qty| read_coils(&coils, addr, qty))
            .on_read_discrete_inputs(|addr, qty| read_coils(&coils, addr, qty))
            .on_write_coils(|addr, values| write_coils(&coils, addr, values));

        match slave.serve_one(&mut callbacks) {
            Ok(Some(n)) => info!(bytes = n, "replied to a request"),
            Ok(None) => {}
            Err(e) => info!(error = %e, "slave transport error"),
        }
    }
}

fn read_regs(store: &RefCell<Vec<u16>>, addr: u16, qty: u16) -> Result<Vec<u16>, ExceptionCode> {
    let store = store.borrow();
    store
        .get(addr as usize..addr as usize + qty as usize)
        .map(<[u16]>::to_vec)
        .ok_or(ExceptionCode::IllegalDataAddress)
}

fn write_regs(store: &RefCell<Vec<u16>>, addr: u16, values: &[u16]) -> Result<(), ExceptionCode> {
    let mut store = store.borrow_mut();
    let slice = store
        .get_mut(addr as usize..addr as usize + values.len())
        .ok_or(ExceptionCode::IllegalDataAddress)?;
    slice.copy_from_slice(values);
    Ok(())
}

fn read_coils(store: &RefCell<Vec<bool>>, addr: u16, qty: u16) -> Result<Vec<bool>, ExceptionCode> {
    let store = store.borrow();
    store
        .get(addr as usize..addr as usize + qty as usize)
        .map(<[bool]>::to_vec)
        .ok_or(ExceptionCode::IllegalDataAddress)
}

fn write_coils(store: &RefCell<Vec<bool>>, addr: u16, values: &[bool]) -> Result<(), ExceptionCode> {
    let mut store = store.borrow_mut();
    let slice = store
        .get_mut(addr as usize..addr as usize + values.len())
        .ok_or(ExceptionCode::IllegalDataAddress)?;
    slice.copy_from_slice(values);
    Ok(())
}
