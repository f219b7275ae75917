//! A reference evaluator for the integer subset of the IR, used to check
//! lifted semantics end-to-end. It implements the external contracts the
//! core only emits calls to: the lazy-flags evaluator helpers and a flat
//! little-endian memory.

#![allow(dead_code)]

use std::collections::HashMap;
use tern_ir::{BinOp, Block, Const, ExitKind, Expr, PureHelper, Stmt, Ty, UnOp};
use tern_types::{Cond, Width};
use tern_x86::guest;
use tern_x86::{decode_one, LiftParams, Outcome};

pub struct Machine {
    pub guest: Vec<u8>,
    pub mem: HashMap<u64, u8>,
    temps: Vec<u128>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit {
    pub target: u64,
    pub kind: ExitKind,
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}

impl Machine {
    pub fn new() -> Machine {
        Machine {
            guest: vec![0u8; guest::GUEST_SIZE as usize],
            mem: HashMap::new(),
            temps: Vec::new(),
        }
    }

    pub fn set_gpr(&mut self, idx: u8, val: u64) {
        let off = guest::gpr_off(idx) as usize;
        self.guest[off..off + 8].copy_from_slice(&val.to_le_bytes());
    }

    pub fn gpr(&self, idx: u8) -> u64 {
        let off = guest::gpr_off(idx) as usize;
        u64::from_le_bytes(self.guest[off..off + 8].try_into().unwrap())
    }

    pub fn guest_u64(&self, off: u16) -> u64 {
        let off = off as usize;
        u64::from_le_bytes(self.guest[off..off + 8].try_into().unwrap())
    }

    pub fn set_guest_u64(&mut self, off: u16, val: u64) {
        let off = off as usize;
        self.guest[off..off + 8].copy_from_slice(&val.to_le_bytes());
    }

    pub fn write_mem(&mut self, addr: u64, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.mem.insert(addr + i as u64, *b);
        }
    }

    pub fn read_mem_u64(&self, addr: u64, len: usize) -> u64 {
        let mut out = 0u64;
        for i in 0..len {
            out |= (*self.mem.get(&(addr + i as u64)).unwrap_or(&0) as u64) << (8 * i);
        }
        out
    }

    /// Run a block purely to materialize its temporaries.
    pub fn temps_from(&mut self, block: &Block) {
        let _ = self.run(block);
    }

    /// Read a temporary after [`Machine::temps_from`]/[`Machine::run`].
    pub fn eval_temp(&self, _block: &Block, t: tern_ir::TempId) -> u64 {
        self.temps[t.index()] as u64
    }

    /// The materialized RFLAGS of the currently live thunk.
    pub fn rflags(&self) -> u64 {
        calc_rflags(
            self.guest_u64(guest::OFF_CC_OP),
            self.guest_u64(guest::OFF_CC_DEP1),
            self.guest_u64(guest::OFF_CC_DEP2),
            self.guest_u64(guest::OFF_CC_NDEP),
        )
    }

    pub fn cond(&self, cond: Cond) -> bool {
        eval_cond(cond, self.rflags())
    }

    /// Execute a block's statements. Returns the first taken side exit, or
    /// the block's final transfer when it has one.
    pub fn run(&mut self, block: &Block) -> Option<Exit> {
        self.temps = vec![0u128; block.temp_count()];
        for stmt in &block.stmts {
            match stmt {
                Stmt::IMark { .. } | Stmt::AbiHint { .. } | Stmt::Fence => {}
                Stmt::WrTemp { dst, val } => {
                    let v = self.eval(block, val);
                    self.temps[dst.index()] = v;
                }
                Stmt::Put { off, val } => {
                    let ty = block.ty_of(val);
                    let v = self.eval(block, val);
                    self.put_guest(*off, v, ty);
                }
                Stmt::PutArr { desc, ix, val } => {
                    let i = (self.eval(block, ix) as u64 % desc.nelem as u64) as u16;
                    let off = desc.base + i * (desc.elem.bits() / 8) as u16;
                    let v = self.eval(block, val);
                    self.put_guest(off, v, desc.elem);
                }
                Stmt::Store { addr, val } => {
                    let ty = block.ty_of(val);
                    let a = self.eval(block, addr) as u64;
                    let v = self.eval(block, val);
                    for i in 0..(ty.bits() / 8) as u64 {
                        self.mem.insert(a + i, (v >> (8 * i)) as u8);
                    }
                }
                Stmt::Cas {
                    addr,
                    expected,
                    new,
                    old,
                } => {
                    let ty = block.ty_of(new);
                    let len = (ty.bits() / 8) as usize;
                    let a = self.eval(block, addr) as u64;
                    let cur = self.read_mem_u64(a, len) as u128;
                    let exp = self.eval(block, expected);
                    let newv = self.eval(block, new);
                    if cur == exp {
                        for i in 0..len as u64 {
                            self.mem.insert(a + i, (newv >> (8 * i)) as u8);
                        }
                    }
                    self.temps[old.index()] = cur;
                }
                Stmt::Exit {
                    guard,
                    target,
                    kind,
                } => {
                    if self.eval(block, guard) != 0 {
                        return Some(Exit {
                            target: *target,
                            kind: *kind,
                        });
                    }
                }
                Stmt::DirtyCall { .. } => {
                    panic!("reference evaluator does not model helper calls")
                }
            }
        }
        block.next.as_ref().map(|(target, kind)| Exit {
            target: self.eval(block, target) as u64,
            kind: *kind,
        })
    }

    fn put_guest(&mut self, off: u16, v: u128, ty: Ty) {
        let len = (ty.bits() / 8) as usize;
        for i in 0..len {
            self.guest[off as usize + i] = (v >> (8 * i)) as u8;
        }
    }

    fn get_guest(&self, off: u16, ty: Ty) -> u128 {
        let len = (ty.bits() / 8) as usize;
        let mut out = 0u128;
        for i in 0..len {
            out |= (self.guest[off as usize + i] as u128) << (8 * i);
        }
        out
    }

    fn eval(&self, block: &Block, e: &Expr) -> u128 {
        match e {
            Expr::Const(c) => match c {
                Const::U1(b) => *b as u128,
                Const::U8(v) => *v as u128,
                Const::U16(v) => *v as u128,
                Const::U32(v) => *v as u128,
                Const::U64(v) => *v as u128,
                other => panic!("unsupported constant {other:?}"),
            },
            Expr::Temp(t) => self.temps[t.index()],
            Expr::Get { off, ty } => self.get_guest(*off, *ty),
            Expr::GetArr { desc, ix } => {
                let i = (self.eval(block, ix) as u64 % desc.nelem as u64) as u16;
                let off = desc.base + i * (desc.elem.bits() / 8) as u16;
                self.get_guest(off, desc.elem)
            }
            Expr::Load { ty, addr } => {
                let a = self.eval(block, addr) as u64;
                self.read_mem_u64(a, (ty.bits() / 8) as usize) as u128
            }
            Expr::Unop { op, src } => {
                let v = self.eval(block, src);
                eval_unop(*op, v)
            }
            Expr::Binop { op, lhs, rhs } => {
                let a = self.eval(block, lhs);
                let b = self.eval(block, rhs);
                eval_binop(*op, a, b)
            }
            Expr::Mux {
                cond,
                if_true,
                if_false,
            } => {
                if self.eval(block, cond) != 0 {
                    self.eval(block, if_true)
                } else {
                    self.eval(block, if_false)
                }
            }
            Expr::CallPure { func, args } => {
                let vals: Vec<u64> = args.iter().map(|a| self.eval(block, a) as u64).collect();
                eval_pure(*func, &vals) as u128
            }
            Expr::Triop { .. } => panic!("reference evaluator is integer-only"),
        }
    }
}

fn wmask(w: Width) -> u128 {
    w.mask() as u128
}

fn eval_unop(op: UnOp, v: u128) -> u128 {
    match op {
        UnOp::Not(w) => !v & wmask(w),
        UnOp::Neg(w) => v.wrapping_neg() & wmask(w),
        UnOp::Clz(w) => {
            let bits = w.bits();
            let v = (v & wmask(w)) as u64;
            (v.leading_zeros().saturating_sub(64 - bits)) as u128
        }
        UnOp::Ctz(w) => {
            let v = (v & wmask(w)) as u64;
            if v == 0 {
                w.bits() as u128
            } else {
                v.trailing_zeros() as u128
            }
        }
        UnOp::WidenU { from, .. } => v & wmask(from),
        UnOp::WidenS { from, to } => {
            (from.sign_extend((v & wmask(from)) as u64) as u128) & wmask(to)
        }
        UnOp::Narrow { to, .. } => v & wmask(to),
        UnOp::Bswap(w) => {
            let bytes = w.bytes();
            let mut out = 0u128;
            for i in 0..bytes {
                out |= ((v >> (8 * i)) & 0xff) << (8 * (bytes - 1 - i));
            }
            out
        }
        UnOp::CmpNez(w) => ((v & wmask(w)) != 0) as u128,
        UnOp::B1To(_) => (v != 0) as u128,
        UnOp::I128Lo => v & u64::MAX as u128,
        UnOp::I128Hi => v >> 64,
        other => panic!("unsupported unop {other:?}"),
    }
}

fn eval_binop(op: BinOp, a: u128, b: u128) -> u128 {
    use BinOp::*;
    match op {
        Add(w) => (a.wrapping_add(b)) & wmask(w),
        Sub(w) => (a.wrapping_sub(b)) & wmask(w),
        And(w) => (a & b) & wmask(w),
        Or(w) => (a | b) & wmask(w),
        Xor(w) => (a ^ b) & wmask(w),
        Shl(w) => {
            let count = (b & 0xff) as u32;
            if count >= w.bits() {
                0
            } else {
                (a << count) & wmask(w)
            }
        }
        Shr(w) => {
            let count = (b & 0xff) as u32;
            if count >= w.bits() {
                0
            } else {
                ((a & wmask(w)) >> count) & wmask(w)
            }
        }
        Sar(w) => {
            let count = ((b & 0xff) as u32).min(w.bits() - 1);
            let sv = w.sign_extend((a & wmask(w)) as u64) as i64;
            ((sv >> count) as u64 as u128) & wmask(w)
        }
        Mul(w) => (a.wrapping_mul(b)) & wmask(w),
        MulWidenU(w) => (a & wmask(w)).wrapping_mul(b & wmask(w)),
        MulWidenS(w) => {
            let sa = w.sign_extend((a & wmask(w)) as u64) as i64 as i128;
            let sb = w.sign_extend((b & wmask(w)) as u64) as i64 as i128;
            sa.wrapping_mul(sb) as u128
        }
        Concat(w) => ((a & wmask(w)) << w.bits()) | (b & wmask(w)),
        CmpEq(w) => ((a & wmask(w)) == (b & wmask(w))) as u128,
        CmpNe(w) => ((a & wmask(w)) != (b & wmask(w))) as u128,
        CmpLtU(w) => ((a & wmask(w)) < (b & wmask(w))) as u128,
        CmpLeU(w) => ((a & wmask(w)) <= (b & wmask(w))) as u128,
        CmpLtS(w) => {
            let sa = w.sign_extend((a & wmask(w)) as u64) as i64;
            let sb = w.sign_extend((b & wmask(w)) as u64) as i64;
            (sa < sb) as u128
        }
        CmpLeS(w) => {
            let sa = w.sign_extend((a & wmask(w)) as u64) as i64;
            let sb = w.sign_extend((b & wmask(w)) as u64) as i64;
            (sa <= sb) as u128
        }
        DivModU(w) => {
            let denom = b & wmask(w);
            assert!(denom != 0, "division by zero reached the evaluator");
            let quot = a / denom;
            let rem = a % denom;
            (rem << w.bits()) | (quot & wmask(w))
        }
        other => panic!("unsupported binop {other:?}"),
    }
}

fn parity(v: u8) -> bool {
    v.count_ones() % 2 == 0
}

const CF: u64 = 1;
const PF: u64 = 1 << 2;
const AF: u64 = 1 << 4;
const ZF: u64 = 1 << 6;
const SF: u64 = 1 << 7;
const OF: u64 = 1 << 11;

fn width_of_code(code: u64) -> Width {
    match code & 3 {
        0 => Width::W8,
        1 => Width::W16,
        2 => Width::W32,
        _ => Width::W64,
    }
}

/// The reference implementation of the external lazy-flags evaluator. Class
/// encodings follow the decoder's `cc_op` contract.
fn calc_rflags(cc_op: u64, dep1: u64, dep2: u64, ndep: u64) -> u64 {
    let w = width_of_code(cc_op);
    let class = cc_op >> 2;
    let mask = w.mask();
    let sb = w.sign_bit();

    let szp = |res: u64| -> u64 {
        let mut f = 0;
        if res & mask == 0 {
            f |= ZF;
        }
        if res & sb != 0 {
            f |= SF;
        }
        if parity(res as u8) {
            f |= PF;
        }
        f
    };

    match class {
        // Copy.
        0 => dep1 & (CF | PF | AF | ZF | SF | OF),
        // Add / Adc.
        1 | 3 => {
            let (a, b, cin) = if class == 3 {
                (dep1 & mask, (dep2 ^ ndep) & mask, ndep & 1)
            } else {
                (dep1 & mask, dep2 & mask, 0)
            };
            let wide = a as u128 + b as u128 + cin as u128;
            let res = (wide as u64) & mask;
            let mut f = szp(res);
            if wide > mask as u128 {
                f |= CF;
            }
            if (a ^ res) & (b ^ res) & sb != 0 {
                f |= OF;
            }
            if (a ^ b ^ res) & 0x10 != 0 {
                f |= AF;
            }
            f
        }
        // Sub / Sbb.
        2 | 4 => {
            let (a, b, bin) = if class == 4 {
                (dep1 & mask, (dep2 ^ ndep) & mask, ndep & 1)
            } else {
                (dep1 & mask, dep2 & mask, 0)
            };
            let sub = b as u128 + bin as u128;
            let res = (a as u128).wrapping_sub(sub) as u64 & mask;
            let mut f = szp(res);
            if (a as u128) < sub {
                f |= CF;
            }
            let b2 = (b.wrapping_add(bin)) & mask;
            if (a ^ b2) & (a ^ res) & sb != 0 {
                f |= OF;
            }
            if (a ^ b2 ^ res) & 0x10 != 0 {
                f |= AF;
            }
            f
        }
        // Logic.
        5 => szp(dep1),
        // Inc / Dec: carry comes from ndep.
        6 | 7 => {
            let res = dep1 & mask;
            let mut f = szp(res) | (ndep & CF);
            let before = if class == 6 {
                res.wrapping_sub(1)
            } else {
                res.wrapping_add(1)
            } & mask;
            if class == 6 && res == sb {
                f |= OF;
            }
            if class == 7 && res == sb.wrapping_sub(1) & mask {
                f |= OF;
            }
            if (before ^ 1 ^ res) & 0x10 != 0 {
                f |= AF;
            }
            f
        }
        // Shl: dep2 holds the value shifted one less.
        8 => {
            let res = dep1 & mask;
            let pre = dep2 & mask;
            let mut f = szp(res);
            if pre & sb != 0 {
                f |= CF;
            }
            if (res ^ pre) & sb != 0 {
                f |= OF;
            }
            f
        }
        // Shr/Sar: dep2 holds the value shifted one less.
        9 => {
            let res = dep1 & mask;
            let pre = dep2 & mask;
            let mut f = szp(res);
            if pre & 1 != 0 {
                f |= CF;
            }
            if (res ^ pre) & sb != 0 {
                f |= OF;
            }
            f
        }
        // Rol / Ror: only CF/OF change, from the result; rest from ndep.
        10 | 11 => {
            let res = dep1 & mask;
            let mut f = ndep & (PF | AF | ZF | SF);
            if class == 10 {
                f |= res & 1;
                if ((res >> (w.bits() - 1)) ^ res) & 1 != 0 {
                    f |= OF;
                }
            } else {
                f |= (res >> (w.bits() - 1)) & 1;
                if ((res >> (w.bits() - 1)) ^ (res >> (w.bits() - 2))) & 1 != 0 {
                    f |= OF;
                }
            }
            f
        }
        // UMul / SMul.
        14 | 15 => {
            let a = dep1 & mask;
            let b = dep2 & mask;
            let (lo, overflow) = if class == 14 {
                let wide = (a as u128) * (b as u128);
                ((wide as u64) & mask, wide > mask as u128)
            } else {
                let sa = w.sign_extend(a) as i64 as i128;
                let sb_ = w.sign_extend(b) as i64 as i128;
                let wide = sa * sb_;
                let lo = (wide as u64) & mask;
                let sext = w.sign_extend(lo) as i64 as i128;
                (lo, wide != sext)
            };
            let mut f = szp(lo);
            f &= !ZF; // ZF is undefined after MUL; the reference leaves it clear.
            if overflow {
                f |= CF | OF;
            }
            f
        }
        other => panic!("unsupported cc class {other}"),
    }
}

fn eval_cond(cond: Cond, f: u64) -> bool {
    let cf = f & CF != 0;
    let pf = f & PF != 0;
    let zf = f & ZF != 0;
    let sf = f & SF != 0;
    let of = f & OF != 0;
    match cond {
        Cond::O => of,
        Cond::No => !of,
        Cond::B => cf,
        Cond::Ae => !cf,
        Cond::E => zf,
        Cond::Ne => !zf,
        Cond::Be => cf || zf,
        Cond::A => !cf && !zf,
        Cond::S => sf,
        Cond::Ns => !sf,
        Cond::P => pf,
        Cond::Np => !pf,
        Cond::L => sf != of,
        Cond::Ge => sf == of,
        Cond::Le => zf || (sf != of),
        Cond::G => !zf && (sf == of),
    }
}

fn eval_pure(func: PureHelper, args: &[u64]) -> u64 {
    match func {
        PureHelper::CalcCond(cond) => {
            let f = calc_rflags(args[0], args[1], args[2], args[3]);
            eval_cond(cond, f) as u64
        }
        PureHelper::CalcRflagsC => {
            calc_rflags(args[0], args[1], args[2], args[3]) & CF
        }
        PureHelper::CalcRflagsAll => calc_rflags(args[0], args[1], args[2], args[3]),
        PureHelper::PopCount(_) => args[0].count_ones() as u64,
        other => panic!("unsupported helper {}", other.name()),
    }
}

/// Decode one instruction into a fresh block with default parameters. Every
/// lifted block must pass the structural checker, including failure blocks.
pub fn lift(bytes: &[u8], pc: u64) -> (Block, Outcome) {
    let params = LiftParams::default();
    let mut block = Block::new();
    let outcome = decode_one(bytes, pc, &params, &mut block);
    if let Err(e) = tern_ir::sanity_check(&block) {
        panic!("ill-formed block for {bytes:02x?}: {e}");
    }
    (block, outcome)
}

/// Decode and execute one instruction on the machine.
pub fn step(m: &mut Machine, bytes: &[u8], pc: u64) -> (Outcome, Option<Exit>) {
    let (block, outcome) = lift(bytes, pc);
    assert!(outcome.len > 0, "decode failed for {bytes:02x?}");
    let exit = m.run(&block);
    (outcome, exit)
}
