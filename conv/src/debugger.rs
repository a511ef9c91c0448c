// debugger.rs - Cooperative stepping over a CodeVm
//
// The VM runs one instruction per step; the debugger decides when to pause.

use crate::error::VmFault;
use crate::vm::{CodeCallback, CodeVm};
use std::collections::BTreeSet;
use tracing::debug;

/// Why a debugger run stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Requested stepping finished
    Step,
    /// Instruction pointer reached a breakpoint
    Breakpoint(u16),
    /// Script ended normally
    Finished,
    /// Script ended with a fault
    Fault(VmFault),
}

pub struct Debugger {
    vm: CodeVm,
    breakpoints: BTreeSet<u16>,
}

impl Debugger {
    pub fn new(vm: CodeVm) -> Self {
        Debugger {
            vm,
            breakpoints: BTreeSet::new(),
        }
    }

    pub fn vm(&self) -> &CodeVm {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut CodeVm {
        &mut self.vm
    }

    pub fn into_vm(self) -> CodeVm {
        self.vm
    }

    pub fn add_breakpoint(&mut self, pos: u16) {
        self.breakpoints.insert(pos);
    }

    pub fn remove_breakpoint(&mut self, pos: u16) -> bool {
        self.breakpoints.remove(&pos)
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = u16> + '_ {
        self.breakpoints.iter().copied()
    }

    fn ended(&self) -> StopReason {
        match self.vm.fault() {
            Some(fault) => StopReason::Fault(fault.clone()),
            None => StopReason::Finished,
        }
    }

    /// Execute a single instruction
    pub fn step_into(&mut self, callback: &mut dyn CodeCallback) -> StopReason {
        if self.vm.step(callback) {
            StopReason::Step
        } else {
            self.ended()
        }
    }

    /// Step until the current call depth is reached again, running called
    /// functions as a whole
    pub fn step_over(&mut self, callback: &mut dyn CodeCallback) -> StopReason {
        let depth = self.vm.call_depth();
        self.run_while(callback, |vm| vm.call_depth() > depth)
    }

    /// Run until the current function has returned
    pub fn step_out(&mut self, callback: &mut dyn CodeCallback) -> StopReason {
        let depth = self.vm.call_depth();
        self.run_while(callback, |vm| vm.call_depth() >= depth)
    }

    /// Run until a breakpoint is hit or the script ends
    pub fn run(&mut self, callback: &mut dyn CodeCallback) -> StopReason {
        self.run_while(callback, |_| true)
    }

    fn run_while(
        &mut self,
        callback: &mut dyn CodeCallback,
        keep_going: impl Fn(&CodeVm) -> bool,
    ) -> StopReason {
        loop {
            if !self.vm.step(callback) {
                return self.ended();
            }

            let ip = self.vm.instruction_pointer();
            if self.breakpoints.contains(&ip) {
                debug!("breakpoint hit at {:04x}", ip);
                return StopReason::Breakpoint(ip);
            }

            if !keep_going(&self.vm) {
                return StopReason::Step;
            }
        }
    }
}
