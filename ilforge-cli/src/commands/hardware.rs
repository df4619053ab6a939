use std::sync::Arc;

use ilforge::protocol::Session;

use crate::{app::GlobalOptions, output::print_output, tcp::TcpTransport};

pub fn run(host: &str, opts: &GlobalOptions) -> anyhow::Result<()> {
    let session = Session::new(Arc::new(TcpTransport::connect(host)?));
    let info = session.query_capabilities()?;

    print_output(&info, opts, |info| {
        println!("Protocol:        {}", info.protocol_version);
        println!("int size:        {} bytes", info.int_size);
        println!("Pointer size:    {} bytes", info.pointer_size);
        println!("Flash:           {} of {} bytes used", info.flash_used, info.flash_size);
        println!("RAM:             {} bytes", info.ram_size);
        println!("Max message:     {} bytes", info.max_message_size);
    })
}
