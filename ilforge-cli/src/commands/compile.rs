use std::{collections::BTreeMap, sync::Arc};

use ilforge::{
    diagnostics::Diagnostic,
    execution::{ClassMember, MemoryEstimate},
    protocol::{LoadOptions, RecordingTransport, Session},
};
use serde::Serialize;

use crate::{
    app::{BuildOptions, GlobalOptions},
    commands::common::build,
    output::{print_output, Listing},
};

#[derive(Debug, Serialize)]
pub struct CompileReport {
    pub entry: String,
    pub snapshot_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_hash: Option<String>,
    pub classes: usize,
    pub methods: usize,
    pub strings: usize,
    pub special_types: usize,
    pub static_constructors: Vec<String>,
    pub memory: MemoryEstimate,
    /// Packets an upload to an empty board sends, per command
    pub packets: BTreeMap<String, usize>,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<MemberInfo>,
}

#[derive(Debug, Serialize)]
pub struct MemberInfo {
    pub token: String,
    pub kind: &'static str,
    pub name: String,
    pub size: u32,
}

pub fn run(options: &BuildOptions, members: bool, opts: &GlobalOptions) -> anyhow::Result<()> {
    let build = build(options)?;
    let universe = &build.program.universe;
    let set = &build.set;

    // rehearse the upload against an in-memory board
    let transport = Arc::new(RecordingTransport::new());
    let session = Session::new(Arc::clone(&transport));
    session.load(universe, set, &LoadOptions::default())?;
    let mut packets = BTreeMap::new();
    for command in transport.commands() {
        *packets.entry(command.to_string()).or_insert(0) += 1;
    }

    let mut listing = Vec::new();
    if members {
        for class in set.classes() {
            listing.push(MemberInfo {
                token: class.token.to_string(),
                kind: "class",
                name: class.name.clone(),
                size: class.dynamic_size,
            });
            for member in class.members() {
                listing.push(match member {
                    ClassMember::Field {
                        field,
                        token,
                        size,
                        is_static,
                        ..
                    } => MemberInfo {
                        token: token.to_string(),
                        kind: if *is_static { "static" } else { "field" },
                        name: format!("  {}", universe.field(*field).name),
                        size: *size,
                    },
                    ClassMember::Method { method, token, .. } => MemberInfo {
                        token: token.to_string(),
                        kind: "method",
                        name: format!("  {}", universe.method_signature(*method)),
                        size: set
                            .method(*method)
                            .map_or(0, |d| u32::try_from(d.code_len()).unwrap_or(u32::MAX)),
                    },
                });
            }
        }
    }

    let report = CompileReport {
        entry: universe.method_signature(build.main),
        snapshot_hash: format!("0x{:08X}", set.create_snapshot().hash()),
        kernel_hash: set.kernel().map(|k| format!("0x{:08X}", k.hash())),
        classes: set.classes().len(),
        methods: set.methods().len(),
        strings: set.tokens().strings().len(),
        special_types: set.tokens().special_types().len(),
        static_constructors: set
            .startup_sequence()
            .iter()
            .map(|m| universe.method_signature(*m))
            .collect(),
        memory: set.memory_estimate(universe),
        packets,
        diagnostics: build.diagnostics.iter().cloned().collect(),
        members: listing,
    };

    print_output(&report, opts, |report| {
        println!("Entry point:     {}", report.entry);
        println!("Snapshot:        {}", report.snapshot_hash);
        if let Some(kernel) = &report.kernel_hash {
            println!("Kernel:          {kernel}");
        }
        println!("Classes:         {}", report.classes);
        println!("Methods:         {}", report.methods);
        println!("Strings:         {}", report.strings);
        println!("Special types:   {}", report.special_types);
        println!("Memory:          {} bytes", report.memory.total());
        println!("Diagnostics:     {}", report.diagnostics.len());

        if !report.static_constructors.is_empty() {
            println!("\nStatic constructors:");
            for cctor in &report.static_constructors {
                println!("  {cctor}");
            }
        }

        println!("\nUpload:");
        let mut table = Listing::new(&["Command", "Packets"], &[1]);
        for (command, count) in &report.packets {
            table.row(vec![command.clone(), count.to_string()]);
        }
        table.print();

        if !report.members.is_empty() {
            println!("\nMembers:");
            let mut table = Listing::new(&["Token", "Kind", "Name", "Size"], &[3]);
            for member in &report.members {
                table.row(vec![
                    member.token.clone(),
                    member.kind.to_string(),
                    member.name.clone(),
                    member.size.to_string(),
                ]);
            }
            table.print();
        }
    })
}
