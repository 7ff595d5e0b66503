//! Resource table confuser: renames resource types in each package's type
//! pool and plants the provenance chunk right after the global string pool.

use super::{Confuser, Context};
use crate::chunk::RawChunk;
use crate::config::{provenance_body, provenance_header, KeepTypes, PROVENANCE_CHUNK_TYPE};
use crate::error::Result;

pub const TAG: &str = "table";

/// Directed type renames. Chains are not followed: `attr` becomes `style`
/// even though `style` itself has a substitute.
pub const TYPE_SUBSTITUTIONS: [(&str, &str); 4] = [
    ("attr", "style"),
    ("style", "plurals"),
    ("id", "attr"),
    ("mipmap", "id"),
];

/// The name a type pool entry should carry. Kept types, and types whose
/// substitute is kept, stay as they are.
pub fn substitute<'a>(type_name: &'a str, keep: &KeepTypes) -> &'a str {
    if keep.contains(type_name) {
        return type_name;
    }
    match TYPE_SUBSTITUTIONS.iter().find(|(from, _)| *from == type_name) {
        Some((_, to)) if !keep.contains(to) => *to,
        _ => type_name,
    }
}

pub fn provenance_chunk() -> RawChunk {
    RawChunk {
        chunk_type: PROVENANCE_CHUNK_TYPE,
        header: provenance_header(),
        body: provenance_body(),
    }
}

pub struct TableConfuser;

impl Confuser for TableConfuser {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn confuse(&mut self, cx: &mut Context<'_>) -> Result<()> {
        let log = cx.logger(TAG);
        let keep = &cx.options.keep_types;
        let Some(table) = cx.package.table_mut() else {
            log.warn(format_args!("Package has no resource table"));
            return Ok(());
        };

        let decoy = provenance_chunk();
        log.debug(format_args!(
            "decoy chunk header {}",
            hex::encode(&decoy.to_bytes()[..8])
        ));
        table.insert_decoy(decoy);

        let mut renamed = 0usize;
        for package in table.packages_mut() {
            let names: Vec<String> = package.type_strings.iter().map(str::to_string).collect();
            for (index, name) in names.iter().enumerate() {
                let replacement = substitute(name, keep);
                if replacement != name {
                    package.type_strings.set(index as u32, replacement);
                    log.debug(format_args!("{}: type {name} -> {replacement}", package.name));
                    renamed += 1;
                }
            }
        }
        log.info(format_args!("Renamed {renamed} resource types"));
        Ok(())
    }
}
