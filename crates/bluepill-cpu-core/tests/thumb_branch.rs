use bluepill_cpu_core::{CpuBus, CpuCore, Fault, FlatTestBus};
use bluepill_interrupts::Nvic;

const CODE: u32 = 0x100;

fn setup(halfwords: &[u16]) -> (CpuCore, FlatTestBus, Nvic) {
    let mut bus = FlatTestBus::new(0x1_0000);
    bus.write_u32(0x0, 0xF000).unwrap();
    bus.write_u32(0x4, CODE | 1).unwrap();
    bus.load_halfwords(CODE, halfwords);

    let mut cpu = CpuCore::new();
    cpu.reset(&mut bus).unwrap();
    (cpu, bus, Nvic::new())
}

fn run(cpu: &mut CpuCore, bus: &mut FlatTestBus, nvic: &mut Nvic, steps: usize) {
    for _ in 0..steps {
        cpu.step(bus, nvic).unwrap();
    }
}

#[test]
fn unconditional_branch_forward_and_back() {
    // B +2 (skip two halfwords); MOVS R0, #1; MOVS R1, #1; B -8 (back to
    // the first MOVS)
    let (mut cpu, mut bus, mut nvic) = setup(&[0xE001, 0x2001, 0x2101, 0xE7FC]);
    run(&mut cpu, &mut bus, &mut nvic, 1);
    assert_eq!(cpu.state.pc(), CODE + 6);
    run(&mut cpu, &mut bus, &mut nvic, 1); // B back
    assert_eq!(cpu.state.pc(), CODE + 2);
    run(&mut cpu, &mut bus, &mut nvic, 2);
    assert_eq!(cpu.state.r[0], 1);
    assert_eq!(cpu.state.r[1], 1);
}

#[test]
fn branch_to_self_loops() {
    let (mut cpu, mut bus, mut nvic) = setup(&[0xE7FE]);
    for _ in 0..4 {
        cpu.step(&mut bus, &mut nvic).unwrap();
        assert_eq!(cpu.state.pc(), CODE);
    }
    assert_eq!(cpu.state.cycles, 4);
}

#[test]
fn beq_skips_when_z_set() {
    // MOVS R0, #10; MOVS R1, #10; CMP R0, R1; BEQ +0; MOVS R2, #0xFF;
    // MOVS R3, #1; B .
    let (mut cpu, mut bus, mut nvic) =
        setup(&[0x200A, 0x210A, 0x4288, 0xD000, 0x22FF, 0x2301, 0xE7FE]);
    run(&mut cpu, &mut bus, &mut nvic, 5);

    assert_eq!(cpu.state.r[2], 0, "MOVS R2 was branched over");
    assert_eq!(cpu.state.r[3], 1);
    assert!(cpu.state.z());
}

#[test]
fn bne_falls_through_when_z_set() {
    // MOVS R0, #1; CMP R0, R0; BNE +2; MOVS R2, #5
    let (mut cpu, mut bus, mut nvic) = setup(&[0x2001, 0x4280, 0xD101, 0x2205]);
    run(&mut cpu, &mut bus, &mut nvic, 4);
    assert_eq!(cpu.state.r[2], 5);
}

#[test]
fn signed_conditions_follow_n_and_v() {
    // MOVS R0, #2; MOVS R1, #7; CMP R0, R1; BLT +1 -> taken (2 < 7)
    let (mut cpu, mut bus, mut nvic) = setup(&[0x2002, 0x2107, 0x4288, 0xDB00, 0x2201, 0x2301]);
    run(&mut cpu, &mut bus, &mut nvic, 4);
    assert_eq!(cpu.state.pc(), CODE + 10);
    run(&mut cpu, &mut bus, &mut nvic, 1);
    assert_eq!(cpu.state.r[3], 1);
    assert_eq!(cpu.state.r[2], 0);
}

#[test]
fn bl_links_and_bx_lr_returns() {
    // 0x100: BL +8 -> 0x10C; 0x104: MOVS R2, #0xBB; 0x106: B .
    // 0x10C: MOVS R0, #0xAA; 0x10E: BX LR
    let (mut cpu, mut bus, mut nvic) = setup(&[0xF000, 0xF804, 0x22BB, 0xE7FE]);
    bus.load_halfwords(CODE + 0xC, &[0x20AA, 0x4770]);

    run(&mut cpu, &mut bus, &mut nvic, 1);
    assert_eq!(cpu.state.pc(), CODE + 0xC);
    assert_eq!(cpu.state.lr(), (CODE + 4) | 1);

    run(&mut cpu, &mut bus, &mut nvic, 1);
    assert_eq!(cpu.state.r[0], 0xAA);

    run(&mut cpu, &mut bus, &mut nvic, 1);
    assert_eq!(cpu.state.pc(), CODE + 4);

    run(&mut cpu, &mut bus, &mut nvic, 1);
    assert_eq!(cpu.state.r[2], 0xBB);
}

#[test]
fn bl_backward_offset_is_sign_extended() {
    // 0x100: MOVS R4, #1; 0x102: B . ; target of the BL below.
    // 0x110: BL -20 -> 0x100
    let (mut cpu, mut bus, mut nvic) = setup(&[0x2401, 0xE7FE]);
    bus.load_halfwords(CODE + 0x10, &[0xF7FF, 0xFFF6]);
    cpu.state.set_pc(CODE + 0x10);

    run(&mut cpu, &mut bus, &mut nvic, 1);
    assert_eq!(cpu.state.pc(), CODE);
    assert_eq!(cpu.state.lr(), (CODE + 0x14) | 1);
}

#[test]
fn wide_unconditional_branch() {
    // 0x100: B.W +0x10 -> 0x114
    let (mut cpu, mut bus, mut nvic) = setup(&[0xF000, 0xB808]);
    run(&mut cpu, &mut bus, &mut nvic, 1);
    assert_eq!(cpu.state.pc(), CODE + 4 + 0x10);
    assert_eq!(cpu.state.lr(), 0, "B.W does not link");
}

#[test]
fn bx_to_even_address_is_an_interworking_fault() {
    // MOVS R0, #0x40; BX R0
    let (mut cpu, mut bus, mut nvic) = setup(&[0x2040, 0x4700]);
    run(&mut cpu, &mut bus, &mut nvic, 1);
    assert_eq!(
        cpu.step(&mut bus, &mut nvic),
        Err(Fault::InterworkingFault {
            pc: CODE + 2,
            target: 0x40
        })
    );
    // The faulting instruction did not retire.
    assert_eq!(cpu.state.cycles, 1);
}

#[test]
fn mov_pc_branches_and_clears_bit0() {
    // MOVS R0, #0x09; ADD R0, PC... keep it simple: seed R8 directly.
    let (mut cpu, mut bus, mut nvic) = setup(&[0x46C7]); // MOV PC, R8
    bus.load_halfwords(0x140, &[0x2001]);
    cpu.state.r[8] = 0x141;
    run(&mut cpu, &mut bus, &mut nvic, 1);
    assert_eq!(cpu.state.pc(), 0x140);
}

#[test]
fn svc_is_accepted_and_falls_through() {
    // SVC #7; MOVS R0, #1
    let (mut cpu, mut bus, mut nvic) = setup(&[0xDF07, 0x2001]);
    run(&mut cpu, &mut bus, &mut nvic, 2);
    assert_eq!(cpu.state.pc(), CODE + 4);
    assert_eq!(cpu.state.r[0], 1);
}

#[test]
fn permanently_undefined_16bit_encoding_faults() {
    let (mut cpu, mut bus, mut nvic) = setup(&[0xDE00]);
    assert_eq!(
        cpu.step(&mut bus, &mut nvic),
        Err(Fault::InvalidInstruction {
            pc: CODE,
            opcode: 0xDE00
        })
    );
}

#[test]
fn unknown_16bit_encoding_faults() {
    // CBZ is ARMv7-M-only sugar this core does not implement.
    let (mut cpu, mut bus, mut nvic) = setup(&[0xB100]);
    assert!(matches!(
        cpu.step(&mut bus, &mut nvic),
        Err(Fault::InvalidInstruction { .. })
    ));
}

#[test]
fn unknown_32bit_encoding_faults_with_both_halfwords() {
    // LDMIA.W R0!, {R1} - a wide encoding outside the supported set.
    let (mut cpu, mut bus, mut nvic) = setup(&[0xE8B0, 0x0002]);
    assert_eq!(
        cpu.step(&mut bus, &mut nvic),
        Err(Fault::InvalidInstruction {
            pc: CODE,
            opcode: 0xE8B0_0002
        })
    );
}

#[test]
fn wide_udf_is_accepted_and_advances_by_four() {
    // UDF.W #0; MOVS R0, #2
    let (mut cpu, mut bus, mut nvic) = setup(&[0xF7F0, 0xA000, 0x2002]);
    run(&mut cpu, &mut bus, &mut nvic, 2);
    assert_eq!(cpu.state.r[0], 2);
    assert_eq!(cpu.state.pc(), CODE + 6);
}
