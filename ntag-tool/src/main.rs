mod keys;


use std::path::PathBuf;

use clap::Parser;
use ntag424::auth;
use ntag424::commands;
use ntag424::files::{AccessRights, CommMode, FileSettingsUpdate, SdmSettings, NDEF_FILE};
use ntag424::key_change::KeyChangeRequest;

use crate::keys::KeySet;


#[derive(Clone, Debug, Eq, Hash, Ord, Parser, PartialEq, PartialOrd)]
enum Mode {
    /// List the connected PC/SC readers.
    ListReaders,
    /// Print chip identification of the tag on the reader.
    Info(InfoOpts),
    /// Authenticate and read a file.
    Read(ReadOpts),
    /// Rotate all five tag keys from the current key file to the new one.
    Provision(ProvisionOpts),
    /// Configure Secure Dynamic Messaging mirroring on the NDEF file.
    ConfigureSdm(SdmOpts),
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, Parser, PartialEq, PartialOrd)]
struct InfoOpts {
    #[arg(short, long = "reader", default_value = "0")]
    pub reader_index: usize,
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, Parser, PartialEq, PartialOrd)]
struct ReadOpts {
    #[arg(short, long = "reader", default_value = "0")]
    pub reader_index: usize,

    #[arg(short, long = "keys")]
    pub key_path: PathBuf,

    /// Key slot to authenticate with.
    #[arg(short = 's', long = "slot", default_value = "0")]
    pub key_slot: u8,

    #[arg(short, long = "file", default_value = "2")]
    pub file_no: u8,

    #[arg(short, long, default_value = "0")]
    pub offset: u32,

    #[arg(short, long)]
    pub length: u32,
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, Parser, PartialEq, PartialOrd)]
struct ProvisionOpts {
    #[arg(short, long = "reader", default_value = "0")]
    pub reader_index: usize,

    /// Keys currently on the tag; defaults to factory (all-zero) keys.
    #[arg(short, long = "current-keys")]
    pub current_key_path: Option<PathBuf>,

    /// Keys to provision.
    #[arg(short, long = "new-keys")]
    pub new_key_path: PathBuf,

    /// Version byte stored with every changed key.
    #[arg(short = 'v', long = "key-version", default_value = "1")]
    pub key_version: u8,
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, Parser, PartialEq, PartialOrd)]
struct SdmOpts {
    #[arg(short, long = "reader", default_value = "0")]
    pub reader_index: usize,

    #[arg(short, long = "keys")]
    pub key_path: PathBuf,

    /// Offset of the encrypted PICC data mirror in the NDEF file.
    #[arg(long)]
    pub picc_data_offset: u32,

    /// Offset where the MAC input starts.
    #[arg(long)]
    pub mac_input_offset: u32,

    /// Offset of the MAC mirror.
    #[arg(long)]
    pub mac_offset: u32,

    /// Key slot granting SDM metadata decryption.
    #[arg(long, default_value = "2")]
    pub meta_read_key: u8,

    /// Key slot granting SDM MAC verification.
    #[arg(long, default_value = "2")]
    pub file_read_key: u8,
}


fn connect(reader_index: usize) -> pcsc::Card {
    let ctx = pcsc::Context::establish(pcsc::Scope::User)
        .expect("failed to establish PC/SC user context");

    let readers_buf_len = ctx.list_readers_len()
        .expect("failed to obtain length of buffer for PC/SC reader list");
    let mut readers_buf = vec![0u8; readers_buf_len];
    let mut readers = ctx.list_readers(&mut readers_buf)
        .expect("failed to list PC/SC readers");

    let Some(reader) = readers.nth(reader_index) else {
        panic!("no reader at index {}", reader_index)
    };
    match ctx.connect(reader, pcsc::ShareMode::Shared, pcsc::Protocols::ANY) {
        Ok(card) => card,
        Err(e) => panic!("failed to connect to card: {}", e),
    }
}

fn list_readers() {
    let ctx = pcsc::Context::establish(pcsc::Scope::User)
        .expect("failed to establish PC/SC user context");
    let readers_buf_len = ctx.list_readers_len()
        .expect("failed to obtain length of buffer for PC/SC reader list");
    let mut readers_buf = vec![0u8; readers_buf_len];
    let readers = ctx.list_readers(&mut readers_buf)
        .expect("failed to list PC/SC readers");
    for (i, reader) in readers.enumerate() {
        println!("{}: {:?}", i, reader);
    }
}

fn info(opts: InfoOpts) {
    let mut card = connect(opts.reader_index);
    commands::select_application(&mut card)
        .expect("failed to select NDEF application");
    let version = commands::get_version(&mut card)
        .expect("failed to read chip identification");

    println!("UID:        {}", hex::encode_upper(version.uid));
    println!("batch:      {}", hex::encode_upper(&version.batch));
    println!("produced:   week {:02X} of 20{:02X}", version.production_week, version.production_year);
    println!(
        "hardware:   vendor 0x{:02X}, type 0x{:02X}.{:02X}, version {}.{}, storage 0x{:02X}, protocol 0x{:02X}",
        version.hardware.vendor,
        version.hardware.product_type,
        version.hardware.product_subtype,
        version.hardware.major,
        version.hardware.minor,
        version.hardware.storage_size,
        version.hardware.protocol,
    );
    println!(
        "software:   vendor 0x{:02X}, type 0x{:02X}.{:02X}, version {}.{}, storage 0x{:02X}, protocol 0x{:02X}",
        version.software.vendor,
        version.software.product_type,
        version.software.product_subtype,
        version.software.major,
        version.software.minor,
        version.software.storage_size,
        version.software.protocol,
    );
}

fn read(opts: ReadOpts) {
    let key_set = KeySet::load(&opts.key_path);
    let mut card = connect(opts.reader_index);
    commands::select_application(&mut card)
        .expect("failed to select NDEF application");

    let mut session = auth::authenticate(
        &mut card,
        opts.key_slot,
        &key_set.keys[usize::from(opts.key_slot)],
    ).expect("failed to authenticate");

    let settings = commands::get_file_settings(&mut card, &mut session, opts.file_no)
        .expect("failed to read file settings");
    println!(
        "file {}: {:?} mode, {} bytes",
        opts.file_no, settings.comm_mode, settings.size,
    );

    let contents = commands::read_data(&mut card, &mut session, opts.file_no, opts.offset, opts.length)
        .expect("failed to read file");
    for (index, chunk) in contents.chunks(16).enumerate() {
        println!("{:08X}  {}", opts.offset as usize + index * 16, hex::encode_upper(chunk));
    }
}

fn provision(opts: ProvisionOpts) {
    let current_keys = match &opts.current_key_path {
        Some(path) => KeySet::load(path),
        None => KeySet::factory_default(),
    };
    let new_keys = KeySet::load(&opts.new_key_path);

    let mut card = connect(opts.reader_index);
    commands::select_application(&mut card)
        .expect("failed to select NDEF application");
    let mut session = auth::authenticate(&mut card, 0, &current_keys.keys[0])
        .expect("failed to authenticate with the current master key");

    // application keys first; the master key change kills the session
    for slot in 1..keys::KEY_COUNT as u8 {
        commands::change_key(&mut card, &mut session, &KeyChangeRequest {
            key_no: slot,
            new_key: new_keys.keys[usize::from(slot)],
            old_key: Some(current_keys.keys[usize::from(slot)]),
            version: opts.key_version,
        }).unwrap_or_else(|e| panic!("failed to change key {}: {}", slot, e));
        println!("key {} changed", slot);
    }

    commands::change_key(&mut card, &mut session, &KeyChangeRequest {
        key_no: 0,
        new_key: new_keys.keys[0],
        old_key: None,
        version: opts.key_version,
    }).expect("failed to change the master key");
    drop(session);
    println!("master key changed, re-authenticating");

    let mut session = auth::authenticate(&mut card, 0, &new_keys.keys[0])
        .expect("failed to re-authenticate with the new master key");
    for slot in 0..keys::KEY_COUNT as u8 {
        let version = commands::get_key_version(&mut card, &mut session, slot)
            .expect("failed to read key version");
        println!("key {} at version {}", slot, version);
    }
    println!("provisioning complete");
}

fn configure_sdm(opts: SdmOpts) {
    let key_set = KeySet::load(&opts.key_path);
    let mut card = connect(opts.reader_index);
    commands::select_application(&mut card)
        .expect("failed to select NDEF application");
    let mut session = auth::authenticate(&mut card, 0, &key_set.keys[0])
        .expect("failed to authenticate");

    let update = FileSettingsUpdate {
        comm_mode: CommMode::Plain,
        access_rights: AccessRights {
            read: 0xE,
            write: 0x0,
            read_write: 0x0,
            change: 0x0,
        },
        sdm: Some(SdmSettings {
            uid_mirror: true,
            read_counter: true,
            ascii_encoding: true,
            meta_read_access: opts.meta_read_key,
            file_read_access: opts.file_read_key,
            counter_retrieval_access: opts.file_read_key,
            picc_data_offset: Some(opts.picc_data_offset),
            mac_input_offset: Some(opts.mac_input_offset),
            mac_offset: Some(opts.mac_offset),
            ..SdmSettings::default()
        }),
    };
    commands::change_file_settings(&mut card, &mut session, NDEF_FILE, &update)
        .expect("failed to change NDEF file settings");
    println!("SDM mirroring configured on file {}", NDEF_FILE);
}

fn main() {
    tracing_subscriber::fmt::init();
    match Mode::parse() {
        Mode::ListReaders => list_readers(),
        Mode::Info(opts) => info(opts),
        Mode::Read(opts) => read(opts),
        Mode::Provision(opts) => provision(opts),
        Mode::ConfigureSdm(opts) => configure_sdm(opts),
    }
}
