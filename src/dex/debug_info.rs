//! The compressed debug-information stream.
//!
//! Each stream drives a little state machine over a method's instructions:
//! an address register, a line register seeded by `line_start`, and a table
//! of live locals per Dalvik register. Positions and local lifetimes are
//! reported through caller-supplied callbacks; the position callback may
//! stop the decode early by returning `true`.

use crate::dex::code_item::CodeItem;
use crate::dex::dex_file::{DexFile, NO_INDEX};
use crate::dex::error::{DexError, DexErrorKind};
use crate::dex::{read_u1, read_sleb128, read_uleb128, read_uleb128p1};

pub const DBG_END_SEQUENCE: u8 = 0x00;
pub const DBG_ADVANCE_PC: u8 = 0x01;
pub const DBG_ADVANCE_LINE: u8 = 0x02;
pub const DBG_START_LOCAL: u8 = 0x03;
pub const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
pub const DBG_END_LOCAL: u8 = 0x05;
pub const DBG_RESTART_LOCAL: u8 = 0x06;
pub const DBG_SET_PROLOGUE_END: u8 = 0x07;
pub const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
pub const DBG_SET_FILE: u8 = 0x09;
pub const DBG_FIRST_SPECIAL: u8 = 0x0a;
pub const DBG_LINE_BASE: i32 = -4;
pub const DBG_LINE_RANGE: u32 = 15;

#[derive(Debug, Default, Clone, Copy)]
struct LocalInfo<'a> {
    name: Option<&'a [u8]>,
    descriptor: Option<&'a [u8]>,
    signature: Option<&'a [u8]>,
    start_address: u32,
    is_live: bool,
}

/// One local variable lifetime, reported when the local goes out of scope
/// (or when the stream ends while it is still live). Names, descriptors and
/// signatures are raw MUTF-8 slices out of the string pool.
#[derive(Debug, Clone, Copy)]
pub struct LocalEvent<'a> {
    pub reg: u16,
    pub start_address: u32,
    pub end_address: u32,
    pub name: Option<&'a [u8]>,
    pub descriptor: Option<&'a [u8]>,
    pub signature: Option<&'a [u8]>,
}

fn emit_if_live<'a>(
    local_cb: &mut Option<&mut dyn FnMut(LocalEvent<'a>)>,
    locals: &[LocalInfo<'a>],
    reg: usize,
    end_address: u32,
)
{
    if let Some(cb) = local_cb.as_mut()
    {
        let local = &locals[reg];
        if local.is_live {
            cb(LocalEvent {
                reg: reg as u16,
                start_address: local.start_address,
                end_address,
                name: local.name,
                descriptor: local.descriptor,
                signature: local.signature,
            });
        }
    }
}

impl<'a> DexFile<'a>
{
    fn opt_string(&self, idx: u32) -> Result<Option<&'a [u8]>, DexError>
    {
        if idx == NO_INDEX {
            return Ok(None);
        }
        self.string_data_by_idx(idx).map(|(data, _)| Some(data))
    }

    fn opt_type_descriptor(&self, idx: u32) -> Result<Option<&'a [u8]>, DexError>
    {
        if idx == NO_INDEX {
            return Ok(None);
        }
        self.type_descriptor_by_idx(idx).map(Some)
    }

    /// Decodes the debug info stream of a code item.
    ///
    /// `position_cb` receives `(address, line)` pairs and stops the decode
    /// by returning `true`. `local_cb` receives the lifetime of every local
    /// whose scope closes. Either callback may be absent; the stream is
    /// consumed identically in both cases. A method without a stream
    /// (`debug_info_off == 0`) decodes to nothing.
    pub fn decode_debug_info(
        &self,
        code: &CodeItem,
        is_static: bool,
        method_idx: u32,
        mut position_cb: Option<&mut dyn FnMut(u32, u32) -> bool>,
        mut local_cb: Option<&mut dyn FnMut(LocalEvent<'a>)>,
    ) -> Result<(), DexError>
    {
        if code.debug_info_off == 0 {
            return Ok(());
        }
        let bytes = self.region().bytes();
        let mut ix = code.debug_info_off as usize;
        if ix >= bytes.len() {
            return Err(self.located(err!(
                DexErrorKind::MalformedStructure,
                "debug info offset {} outside region of {} bytes", ix, bytes.len()
            )));
        }

        let line_start = read_uleb128(bytes, &mut ix).map_err(|e| self.located(e))?;
        let parameters_size = read_uleb128(bytes, &mut ix).map_err(|e| self.located(e))?;

        let registers = code.registers_size as usize;
        let mut local_in_reg: Vec<LocalInfo<'a>> = vec![LocalInfo::default(); registers];
        let mut address: u32 = 0;
        let mut line: u32 = line_start;

        // The receiver of a non-static method occupies register 0; declared
        // parameters fill the registers after it, wide ones taking two.
        let mut arg_reg: usize = 0;
        if !is_static
        {
            if registers == 0 {
                return Err(self.located(err!(DexErrorKind::MalformedStructure, "no register available for the receiver")));
            }
            let method = self.get_method_id(method_idx)?;
            let descriptor = self.type_descriptor_by_idx(method.class_idx as u32)?;
            local_in_reg[0] = LocalInfo {
                name: Some(b"this"),
                descriptor: Some(descriptor),
                signature: None,
                start_address: 0,
                is_live: true,
            };
            arg_reg = 1;
        }

        if parameters_size > 0
        {
            let method = self.get_method_id(method_idx)?;
            let proto = self.method_prototype(&method)?;
            let params = self.proto_parameters(&proto)?;
            let param_count = params.as_ref().map_or(0, |l| l.size());
            for i in 0..parameters_size
            {
                let name_idx = read_uleb128p1(bytes, &mut ix).map_err(|e| self.located(e))?;
                if i >= param_count {
                    return Err(self.located(err!(
                        DexErrorKind::MalformedStructure,
                        "debug stream names {} parameters but the prototype has {}", parameters_size, param_count
                    )));
                }
                let type_idx = params.as_ref().unwrap().type_idx(i)?;
                let descriptor = self.type_descriptor_by_idx(type_idx as u32)?;
                if arg_reg >= registers {
                    return Err(self.located(err!(
                        DexErrorKind::MalformedStructure,
                        "parameter register {} out of range ({} registers)", arg_reg, registers
                    )));
                }
                let name = self.opt_string(name_idx)?;
                local_in_reg[arg_reg] = LocalInfo {
                    name,
                    descriptor: Some(descriptor),
                    signature: None,
                    start_address: 0,
                    is_live: name.is_some(),
                };
                // wide primitives take a register pair
                arg_reg += match descriptor.first() {
                    Some(b'J') | Some(b'D') => 2,
                    _ => 1,
                };
            }
        }

        loop
        {
            let opcode = read_u1(bytes, &mut ix).map_err(|e| self.located(e))?;
            match opcode
            {
                DBG_END_SEQUENCE => {
                    for reg in 0..registers {
                        emit_if_live(&mut local_cb, &local_in_reg, reg, code.insns_size_in_code_units);
                    }
                    return Ok(());
                }
                DBG_ADVANCE_PC => {
                    address = address.wrapping_add(read_uleb128(bytes, &mut ix).map_err(|e| self.located(e))?);
                }
                DBG_ADVANCE_LINE => {
                    let diff = read_sleb128(bytes, &mut ix).map_err(|e| self.located(e))?;
                    line = (line as i64 + diff as i64) as u32;
                }
                DBG_START_LOCAL | DBG_START_LOCAL_EXTENDED => {
                    let reg = read_uleb128(bytes, &mut ix).map_err(|e| self.located(e))? as usize;
                    if reg >= registers {
                        return Err(self.located(err!(
                            DexErrorKind::MalformedStructure,
                            "local register {} out of range ({} registers)", reg, registers
                        )));
                    }
                    let name_idx = read_uleb128p1(bytes, &mut ix).map_err(|e| self.located(e))?;
                    let descriptor_idx = read_uleb128p1(bytes, &mut ix).map_err(|e| self.located(e))?;
                    let signature = if opcode == DBG_START_LOCAL_EXTENDED {
                        let signature_idx = read_uleb128p1(bytes, &mut ix).map_err(|e| self.located(e))?;
                        self.opt_string(signature_idx)?
                    } else {
                        None
                    };

                    // Whatever previously lived in this register ends here.
                    emit_if_live(&mut local_cb, &local_in_reg, reg, address);
                    local_in_reg[reg] = LocalInfo {
                        name: self.opt_string(name_idx)?,
                        descriptor: self.opt_type_descriptor(descriptor_idx)?,
                        signature,
                        start_address: address,
                        is_live: true,
                    };
                }
                DBG_END_LOCAL => {
                    let reg = read_uleb128(bytes, &mut ix).map_err(|e| self.located(e))? as usize;
                    if reg >= registers {
                        return Err(self.located(err!(
                            DexErrorKind::MalformedStructure,
                            "local register {} out of range ({} registers)", reg, registers
                        )));
                    }
                    emit_if_live(&mut local_cb, &local_in_reg, reg, address);
                    local_in_reg[reg].is_live = false;
                }
                DBG_RESTART_LOCAL => {
                    let reg = read_uleb128(bytes, &mut ix).map_err(|e| self.located(e))? as usize;
                    if reg >= registers {
                        return Err(self.located(err!(
                            DexErrorKind::MalformedStructure,
                            "local register {} out of range ({} registers)", reg, registers
                        )));
                    }
                    if !local_in_reg[reg].is_live {
                        local_in_reg[reg].start_address = address;
                        local_in_reg[reg].is_live = true;
                    }
                }
                DBG_SET_PROLOGUE_END | DBG_SET_EPILOGUE_BEGIN => {
                    // Positional flags with no operands; not surfaced.
                }
                DBG_SET_FILE => {
                    let _file_name_idx = read_uleb128p1(bytes, &mut ix).map_err(|e| self.located(e))?;
                }
                special => {
                    let adj = (special - DBG_FIRST_SPECIAL) as u32;
                    line = (line as i64 + DBG_LINE_BASE as i64 + (adj % DBG_LINE_RANGE) as i64) as u32;
                    address = address.wrapping_add(adj / DBG_LINE_RANGE);
                    if let Some(cb) = position_cb.as_mut()
                    {
                        if cb(address, line) {
                            return Ok(()); // early termination requested
                        }
                    }
                }
            }
        }
    }

    /// The source line for a program counter, in code units from the start
    /// of the method. Returns the line of the greatest emitted position with
    /// `address <= pc`; -1 when the stream has no such position (or no
    /// stream at all); -2 for native methods, which have no code item.
    pub fn line_number_for_pc(
        &self,
        code: Option<&CodeItem>,
        is_static: bool,
        method_idx: u32,
        pc: u32,
    ) -> Result<i32, DexError>
    {
        let code = match code
        {
            Some(code) => code,
            None => return Ok(-2),
        };

        let mut line: i32 = -1;
        let mut on_position = |address: u32, line_num: u32| -> bool {
            if address > pc {
                return true; // positions are emitted in address order
            }
            line = line_num as i32;
            false
        };
        self.decode_debug_info(code, is_static, method_idx, Some(&mut on_position), None)?;
        Ok(line)
    }
}
