macro_rules! emit {
    ($cx:expr, $op:ident) => {
        emit!($cx, $op @ 0)
    };

    ($cx:expr, $op:ident @ $address:expr) => {
        $cx.push($crate::machine::Instruction::new(
            $crate::machine::MachineOp::$op,
            $address,
        ))
    };
}
