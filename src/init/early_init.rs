//! Early scan of the flattened DeviceTree, before it is unflattened.

use alloc::string::String;
use fdt::Fdt;
use super::COMMAND_LINE_SIZE;


/// `/chosen/bootargs`, cut to [`COMMAND_LINE_SIZE`] bytes on a char boundary.
pub fn dt_scan_chosen(fdt: &Fdt) -> String {
    let Some(args) = fdt.find_node("/chosen")
        .and_then(|chosen| chosen.property("bootargs"))
        .and_then(|prop| prop.as_str()) else {
        return String::new();
    };
    let mut end = args.len().min(COMMAND_LINE_SIZE - 1);
    while !args.is_char_boundary(end) {
        end -= 1;
    }
    if end < args.len() {
        warn!("command line truncated to {} bytes", end);
    }
    String::from(&args[..end])
}
