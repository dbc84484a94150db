//! Test utilities: an in-memory LVM
//!
//! [`FakeLvm`] answers the six allow-listed tools with the same output shapes
//! and failure messages as LVM2, keeps track of groups and devices, and
//! records every invocation so tests can assert on the exact commands issued.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::command::{CommandRunner, ExecError, ExecResult, LvmTool};

/// One recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub tool: LvmTool,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn is_mutation(&self) -> bool {
        !matches!(self.tool, LvmTool::Vgs | LvmTool::Pvs)
    }
}

#[derive(Debug, Default)]
struct Group {
    members: Vec<String>,
    extent_size: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    groups: BTreeMap<String, Group>,
    /// Initialised physical volumes not owned by any group
    free: Vec<String>,
    busy: HashSet<String>,
    failures: HashMap<LvmTool, VecDeque<String>>,
    calls: Vec<Invocation>,
}

impl State {
    fn owner(&self, device: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|(_, g)| g.members.iter().any(|m| m == device))
            .map(|(name, _)| name.as_str())
    }

    fn claim(&mut self, tool: LvmTool, group: &str, device: &str) -> Result<(), ExecError> {
        if let Some(owner) = self.owner(device) {
            return Err(failed(
                tool,
                5,
                format!("Physical volume '{device}' is already in volume group '{owner}'"),
            ));
        }
        self.free.retain(|d| d != device);
        if let Some(g) = self.groups.get_mut(group) {
            g.members.push(device.to_string());
        }
        Ok(())
    }
}

fn failed(tool: LvmTool, code: i32, message: impl Into<String>) -> ExecError {
    ExecError::Failed {
        tool,
        code: Some(code),
        message: message.into(),
    }
}

fn not_found(tool: LvmTool, group: &str) -> ExecError {
    failed(
        tool,
        5,
        format!("Volume group \"{group}\" not found\n  Cannot process volume group {group}"),
    )
}

/// Simulated LVM host
#[derive(Debug, Default)]
pub struct FakeLvm {
    state: Mutex<State>,
}

impl FakeLvm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(self, name: &str, members: &[&str]) -> Self {
        {
            let mut state = self.lock();
            state.groups.insert(
                name.to_string(),
                Group {
                    members: members.iter().map(|m| m.to_string()).collect(),
                    extent_size: None,
                },
            );
        }
        self
    }

    pub fn with_free_device(self, device: &str) -> Self {
        self.lock().free.push(device.to_string());
        self
    }

    /// Mark a device as holding allocated extents; vgreduce on it fails.
    pub fn mark_busy(&self, device: &str) {
        self.lock().busy.insert(device.to_string());
    }

    /// Make the next invocation of `tool` fail with `message`.
    pub fn fail_next(&self, tool: LvmTool, message: &str) {
        self.lock()
            .failures
            .entry(tool)
            .or_default()
            .push_back(message.to_string());
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.lock().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Invocation> {
        self.calls().into_iter().filter(Invocation::is_mutation).collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn group_names(&self) -> Vec<String> {
        self.lock().groups.keys().cloned().collect()
    }

    /// Members of `group` in the order they joined, `None` if it does not exist
    pub fn members(&self, group: &str) -> Option<Vec<String>> {
        self.lock().groups.get(group).map(|g| g.members.clone())
    }

    pub fn extent_size(&self, group: &str) -> Option<String> {
        self.lock()
            .groups
            .get(group)
            .and_then(|g| g.extent_size.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn vgs_output(state: &State, only: Option<&str>) -> String {
        let mut out = String::from("  VG     #PV #LV #SN Attr   VSize  VFree\n");
        for (name, group) in &state.groups {
            if only.is_some_and(|o| o != name.as_str()) {
                continue;
            }
            let size = group.members.len() * 10;
            out.push_str(&format!(
                "  {name}   {}   0   0 wz--n- {size}.00g {size}.00g\n",
                group.members.len()
            ));
        }
        out
    }

    fn pvs_output(state: &State) -> String {
        let mut rows: Vec<(String, String)> = state
            .groups
            .iter()
            .flat_map(|(name, g)| g.members.iter().map(move |m| (m.clone(), name.clone())))
            .chain(state.free.iter().map(|d| (d.clone(), String::new())))
            .collect();
        rows.sort();

        let mut out = String::from("  PV,VG\n");
        for (device, group) in rows {
            out.push_str(&format!("  {device},{group}\n"));
        }
        out
    }

    fn handle(state: &mut State, tool: LvmTool, args: &[String]) -> ExecResult {
        match tool {
            LvmTool::Vgs => match args.first() {
                None => Ok(Self::vgs_output(state, None)),
                Some(name) if state.groups.contains_key(name) => {
                    Ok(Self::vgs_output(state, Some(name.as_str())))
                }
                Some(name) => Err(not_found(tool, name)),
            },
            LvmTool::Pvs => Ok(Self::pvs_output(state)),
            LvmTool::VgCreate => {
                let Some((name, rest)) = args.split_first() else {
                    return Err(failed(tool, 3, "Please provide a volume group name"));
                };
                if state.groups.contains_key(name) {
                    return Err(failed(
                        tool,
                        5,
                        format!("A volume group called {name} already exists."),
                    ));
                }

                let mut devices = Vec::new();
                let mut extent_size = None;
                let mut iter = rest.iter();
                while let Some(arg) = iter.next() {
                    if arg == "-s" {
                        extent_size = iter.next().cloned();
                    } else {
                        devices.push(arg.clone());
                    }
                }
                if let Some(device) = devices.iter().find(|d| state.owner(d).is_some()) {
                    let owner = state.owner(device).unwrap_or_default().to_string();
                    return Err(failed(
                        tool,
                        5,
                        format!("Physical volume '{device}' is already in volume group '{owner}'"),
                    ));
                }

                state.groups.insert(
                    name.clone(),
                    Group {
                        members: Vec::new(),
                        extent_size,
                    },
                );
                for device in &devices {
                    state.claim(tool, name, device)?;
                }
                Ok(format!("  Volume group \"{name}\" successfully created\n"))
            }
            LvmTool::VgRemove => {
                let name = args.first().cloned().unwrap_or_default();
                match state.groups.remove(&name) {
                    Some(group) => {
                        state.free.extend(group.members);
                        Ok(format!("  Volume group \"{name}\" successfully removed\n"))
                    }
                    None => Err(not_found(tool, &name)),
                }
            }
            LvmTool::VgExtend => {
                let [name, device] = args else {
                    return Err(failed(
                        tool,
                        3,
                        "Please enter volume group name and physical volume(s)",
                    ));
                };
                if !state.groups.contains_key(name) {
                    return Err(not_found(tool, name));
                }
                state.claim(tool, name, device)?;
                Ok(format!("  Volume group \"{name}\" successfully extended\n"))
            }
            LvmTool::VgReduce => {
                let [name, device] = args else {
                    return Err(failed(
                        tool,
                        3,
                        "Please give volume group name and physical volume paths",
                    ));
                };
                if state.busy.contains(device) {
                    return Err(failed(
                        tool,
                        5,
                        format!("Physical volume \"{device}\" still in use"),
                    ));
                }
                let Some(group) = state.groups.get_mut(name) else {
                    return Err(not_found(tool, name));
                };
                let before = group.members.len();
                group.members.retain(|m| m != device);
                if group.members.len() == before {
                    return Err(failed(
                        tool,
                        5,
                        format!("Physical Volume \"{device}\" not found in Volume Group \"{name}\"."),
                    ));
                }
                state.free.push(device.clone());
                Ok(format!("  Removed \"{device}\" from volume group \"{name}\"\n"))
            }
        }
    }
}

#[async_trait]
impl CommandRunner for FakeLvm {
    async fn run(&self, tool: LvmTool, args: &[&str]) -> ExecResult {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let mut state = self.lock();
        state.calls.push(Invocation {
            tool,
            args: args.clone(),
        });

        if let Some(message) = state.failures.get_mut(&tool).and_then(VecDeque::pop_front) {
            return Err(failed(tool, 5, message));
        }

        Self::handle(&mut state, tool, &args)
    }
}
