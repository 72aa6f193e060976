use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use zip::ZipArchive;

use crate::classfile::parse_class;
use crate::ir::{Class, Instruction, Operands};
use crate::opcodes;

/// Parsed artifacts and classes of one scan.
pub struct ScanOutput {
    pub artifacts: Vec<Artifact>,
    /// Classes reached from `--input`; these are analysed.
    pub classes: Vec<Class>,
    /// Classes reached from `--classpath`; these only feed class resolution.
    pub library_classes: Vec<Class>,
}

impl ScanOutput {
    pub fn class_count(&self) -> usize {
        self.classes.len() + self.library_classes.len()
    }
}

pub fn scan_inputs(input: &Path, classpath: &[PathBuf]) -> Result<ScanOutput> {
    let mut output = ScanOutput {
        artifacts: Vec::new(),
        classes: Vec::new(),
        library_classes: Vec::new(),
    };

    scan_path(input, true, true, &mut output)?;

    // Keep deterministic ordering by sorting classpath entries and directory listings.
    let mut classpath_entries = classpath.to_vec();
    classpath_entries.sort_by_key(|path| path_key(path));

    for entry in classpath_entries {
        scan_path(&entry, false, true, &mut output)?;
    }

    info!(
        "scanned {} target classes and {} classpath classes",
        output.classes.len(),
        output.library_classes.len()
    );
    Ok(output)
}

fn scan_path(path: &Path, is_input: bool, strict: bool, output: &mut ScanOutput) -> Result<()> {
    if path.is_dir() {
        scan_dir(path, is_input, output)?;
        return Ok(());
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let roles = if is_input && strict {
        Some(vec![serde_json::to_value(ArtifactRoles::AnalysisTarget)
            .context("serialize artifact role")?])
    } else {
        None
    };

    match extension {
        "class" => scan_class_file(path, is_input, roles, output),
        "jar" => scan_jar_file(path, is_input, roles, output),
        _ => {
            if strict {
                anyhow::bail!("unsupported input file: {}", path.display())
            } else {
                Ok(())
            }
        }
    }
}

fn scan_dir(path: &Path, is_input: bool, output: &mut ScanOutput) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by_key(|entry| path_key(entry));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, is_input, output)?;
        } else {
            scan_path(&entry, is_input, false, output)?;
        }
    }

    Ok(())
}

fn scan_class_file(
    path: &Path,
    is_input: bool,
    roles: Option<Vec<Value>>,
    output: &mut ScanOutput,
) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let artifact_index = push_artifact(
        path_to_uri(path),
        data.len() as u64,
        None,
        roles,
        &mut output.artifacts,
    );
    let class = load_class(&data, artifact_index)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    push_class(class, is_input, output);
    Ok(())
}

fn scan_jar_file(
    path: &Path,
    is_input: bool,
    roles: Option<Vec<Value>>,
    output: &mut ScanOutput,
) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let jar_len = fs::metadata(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .len();
    let jar_index = push_artifact(path_to_uri(path), jar_len, None, roles, &mut output.artifacts);

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.ends_with(".class") && !name.ends_with("module-info.class") {
            entry_names.push(name);
        }
    }

    entry_names.sort();

    for name in entry_names {
        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;

        let entry_uri = jar_entry_uri(path, &name);
        let artifact_index = push_artifact(
            entry_uri,
            entry.size(),
            Some(jar_index),
            None,
            &mut output.artifacts,
        );
        let class = load_class(&data, artifact_index)
            .with_context(|| format!("failed to parse {}:{}", path.display(), name))?;
        push_class(class, is_input, output);
    }

    Ok(())
}

fn load_class(data: &[u8], artifact_index: i64) -> Result<Class> {
    let mut class = parse_class(data)?;
    class.artifact_index = artifact_index;
    Ok(class)
}

fn push_class(class: Class, is_input: bool, output: &mut ScanOutput) {
    if is_input {
        output.classes.push(class);
    } else {
        output.library_classes.push(class);
    }
}

fn push_artifact(
    uri: String,
    len: u64,
    parent_index: Option<i64>,
    roles: Option<Vec<Value>>,
    artifacts: &mut Vec<Artifact>,
) -> i64 {
    let location = ArtifactLocation::builder().uri(uri).build();
    let artifact = match (parent_index, roles) {
        (Some(parent_index), Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .roles(roles)
            .build(),
        (Some(parent_index), None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .build(),
        (None, Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        (None, None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .build(),
    };
    let index = artifacts.len() as i64;
    artifacts.push(artifact);
    index
}

fn path_to_uri(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn jar_entry_uri(jar_path: &Path, entry_name: &str) -> String {
    format!("jar:{}!/{}", jar_path.to_string_lossy(), entry_name)
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Decode a method body into instructions with resolved operands.
///
/// Branch and switch targets are made absolute. `WIDE` is folded into the
/// instruction it widens, which keeps the offset of the `WIDE` prefix.
pub fn decode_instructions(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let (instruction, length) = decode_at(code, offset)
            .with_context(|| format!("malformed instruction at offset {}", offset))?;
        instructions.push(instruction);
        offset += length;
    }
    Ok(instructions)
}

fn read_u8(code: &[u8], cursor: &mut usize) -> Result<u8> {
    Ok(read_bytes(code, cursor, 1)?[0])
}

fn read_u16(code: &[u8], cursor: &mut usize) -> Result<u16> {
    let bytes = read_bytes(code, cursor, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(code: &[u8], cursor: &mut usize) -> Result<u32> {
    let bytes = read_bytes(code, cursor, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_bytes<'a>(code: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let start = *cursor;
    let bytes = code
        .get(start..start + len)
        .with_context(|| format!("bytecode ends inside operands at {}", start))?;
    *cursor = start + len;
    Ok(bytes)
}

/// Alignment bytes after a switch opcode at `offset`.
pub fn padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

fn decode_at(code: &[u8], offset: usize) -> Result<(Instruction, usize)> {
    let opcode = code[offset];
    let mut cursor = offset + 1;
    let operands = match opcode {
        opcodes::BIPUSH => Operands::Int(read_u8(code, &mut cursor)? as i8 as i32),
        opcodes::SIPUSH => Operands::Int(read_u16(code, &mut cursor)? as i16 as i32),
        opcodes::LDC => Operands::Pool(read_u8(code, &mut cursor)? as u16),
        opcodes::LDC_W
        | opcodes::LDC2_W
        | opcodes::GETSTATIC..=opcodes::INVOKESTATIC
        | opcodes::NEW
        | opcodes::ANEWARRAY
        | opcodes::CHECKCAST
        | opcodes::INSTANCEOF => Operands::Pool(read_u16(code, &mut cursor)?),
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => {
            let index = read_u16(code, &mut cursor)?;
            // count and zero byte, or two zero bytes
            cursor += 2;
            Operands::Pool(index)
        }
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            Operands::Local(read_u8(code, &mut cursor)? as u16)
        }
        opcodes::IINC => Operands::Iinc {
            index: read_u8(code, &mut cursor)? as u16,
            delta: read_u8(code, &mut cursor)? as i8 as i16,
        },
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            let relative = read_u16(code, &mut cursor)? as i16 as i32;
            Operands::Branch(branch_target(offset, relative)?)
        }
        opcodes::GOTO_W | opcodes::JSR_W => {
            let relative = read_u32(code, &mut cursor)? as i32;
            Operands::Branch(branch_target(offset, relative)?)
        }
        opcodes::TABLESWITCH => {
            cursor += padding(offset);
            let default = read_u32(code, &mut cursor)? as i32;
            let low = read_u32(code, &mut cursor)? as i32;
            let high = read_u32(code, &mut cursor)? as i32;
            let count = (high as i64) - (low as i64) + 1;
            if count < 0 {
                anyhow::bail!("invalid tableswitch range {}..={}", low, high);
            }
            let mut targets = vec![branch_target(offset, default)?];
            for _ in 0..count {
                let relative = read_u32(code, &mut cursor)? as i32;
                targets.push(branch_target(offset, relative)?);
            }
            Operands::Switch(targets)
        }
        opcodes::LOOKUPSWITCH => {
            cursor += padding(offset);
            let default = read_u32(code, &mut cursor)? as i32;
            let pairs = read_u32(code, &mut cursor)? as i32;
            if pairs < 0 {
                anyhow::bail!("invalid lookupswitch pair count {}", pairs);
            }
            let mut targets = vec![branch_target(offset, default)?];
            for _ in 0..pairs {
                let _key = read_u32(code, &mut cursor)?;
                let relative = read_u32(code, &mut cursor)? as i32;
                targets.push(branch_target(offset, relative)?);
            }
            Operands::Switch(targets)
        }
        opcodes::NEWARRAY => Operands::NewArray(read_u8(code, &mut cursor)?),
        opcodes::MULTIANEWARRAY => Operands::MultiNewArray {
            index: read_u16(code, &mut cursor)?,
            dimensions: read_u8(code, &mut cursor)?,
        },
        opcodes::WIDE => {
            let widened = read_u8(code, &mut cursor)?;
            let operands = match widened {
                opcodes::IINC => Operands::Iinc {
                    index: read_u16(code, &mut cursor)?,
                    delta: read_u16(code, &mut cursor)? as i16,
                },
                opcodes::ILOAD..=opcodes::ALOAD
                | opcodes::ISTORE..=opcodes::ASTORE
                | opcodes::RET => Operands::Local(read_u16(code, &mut cursor)?),
                _ => anyhow::bail!("wide cannot modify {}", opcodes::mnemonic(widened)),
            };
            return Ok((
                Instruction::new(offset as u32, widened, operands),
                cursor - offset,
            ));
        }
        _ => Operands::None,
    };
    if cursor > code.len() {
        anyhow::bail!("{} runs past the end of the code", opcodes::mnemonic(opcode));
    }
    Ok((Instruction::new(offset as u32, opcode, operands), cursor - offset))
}

fn branch_target(offset: usize, relative: i32) -> Result<u32> {
    let target = offset as i64 + relative as i64;
    u32::try_from(target).with_context(|| format!("branch target {} out of range", target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::tests::sample_class_bytes;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    #[test]
    fn scan_inputs_rejects_invalid_class_file() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let class_path = temp_dir.path().join("bad.class");
        fs::write(&class_path, b"nope").expect("write test class");

        let result = scan_inputs(&class_path, &[]);

        assert!(result.is_err());
    }

    #[test]
    fn scan_inputs_accepts_valid_class_file() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let class_path = temp_dir.path().join("Sample.class");
        fs::write(&class_path, sample_class_bytes(&[opcodes::LCONST_1, opcodes::LRETURN]))
            .expect("write class file");

        let result = scan_inputs(&class_path, &[]).expect("scan class");

        assert_eq!(1, result.class_count());
        assert_eq!(1, result.artifacts.len());
        assert_eq!("com/example/Sample", result.classes[0].name);
        assert_eq!(0, result.classes[0].artifact_index);
    }

    #[test]
    fn scan_inputs_separates_targets_from_classpath_jars() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let class_path = temp_dir.path().join("Sample.class");
        let bytes = sample_class_bytes(&[opcodes::LCONST_0, opcodes::LRETURN]);
        fs::write(&class_path, &bytes).expect("write class file");

        let jar_path = temp_dir.path().join("lib.jar");
        let mut jar = ZipWriter::new(fs::File::create(&jar_path).expect("create jar"));
        jar.start_file("com/example/Sample.class", SimpleFileOptions::default())
            .expect("start jar entry");
        jar.write_all(&bytes).expect("write jar entry");
        jar.start_file("META-INF/MANIFEST.MF", SimpleFileOptions::default())
            .expect("start manifest");
        jar.write_all(b"Manifest-Version: 1.0\n").expect("write manifest");
        jar.finish().expect("finish jar");

        let result = scan_inputs(&class_path, &[jar_path]).expect("scan inputs");

        assert_eq!(1, result.classes.len());
        assert_eq!(1, result.library_classes.len());
        assert_eq!(3, result.artifacts.len());
        assert_eq!(2, result.library_classes[0].artifact_index);
        let entry_uri = result.artifacts[2]
            .location
            .as_ref()
            .and_then(|location| location.uri.as_ref())
            .cloned()
            .expect("artifact uri");
        assert!(entry_uri.ends_with("lib.jar!/com/example/Sample.class"));
    }

    #[test]
    fn decode_folds_wide_and_resolves_targets() {
        let code = [
            opcodes::WIDE,
            opcodes::ILOAD,
            0x01,
            0x00,
            opcodes::WIDE,
            opcodes::IINC,
            0x00,
            0x02,
            0xff,
            0xfe,
            opcodes::GOTO,
            0xff,
            0xf6,
            opcodes::INVOKEINTERFACE,
            0x00,
            0x07,
            0x01,
            0x00,
            opcodes::RETURN,
        ];

        let instructions = decode_instructions(&code).expect("decode");

        assert_eq!(
            vec![
                Instruction::new(0, opcodes::ILOAD, Operands::Local(256)),
                Instruction::new(4, opcodes::IINC, Operands::Iinc { index: 2, delta: -2 }),
                Instruction::new(10, opcodes::GOTO, Operands::Branch(0)),
                Instruction::new(13, opcodes::INVOKEINTERFACE, Operands::Pool(7)),
                Instruction::simple(18, opcodes::RETURN),
            ],
            instructions
        );
    }

    #[test]
    fn decode_aligns_switch_operands() {
        // tableswitch at 1: two padding bytes, default +20, range 0..=1.
        let mut code = vec![opcodes::ICONST_0, opcodes::TABLESWITCH, 0, 0];
        for value in [20i32, 0, 1, 10, 15] {
            code.extend(value.to_be_bytes());
        }
        code.push(opcodes::RETURN);

        let instructions = decode_instructions(&code).expect("decode");

        assert_eq!(
            Operands::Switch(vec![21, 11, 16]),
            instructions[1].operands
        );
        assert_eq!(24, instructions[2].offset);
    }

    #[test]
    fn decode_rejects_truncated_operands() {
        assert!(decode_instructions(&[opcodes::SIPUSH, 0x01]).is_err());
        assert!(decode_instructions(&[opcodes::INVOKEDYNAMIC, 0x00, 0x01, 0x00]).is_err());
    }
}
