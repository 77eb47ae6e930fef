use ssh_exec::RemoteCommand;

use crate::types::VmIdentity;

/// Builds the vm-bhyve commands issued over a VM's lifecycle.
///
/// Every command runs privileged. Image and instance names are passed as
/// separate arguments and quoted by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmCommands {
    /// vm-bhyve management command on the remote host.
    pub vm_binary: String,
    /// Datastore to provision into; vm-bhyve's default when unset.
    pub datastore: Option<String>,
}

impl Default for VmCommands {
    fn default() -> Self {
        Self {
            vm_binary: "vm".into(),
            datastore: None,
        }
    }
}

impl VmCommands {
    fn vm<'a>(&'a self, args: impl IntoIterator<Item = &'a str>) -> RemoteCommand {
        RemoteCommand::new(std::iter::once(self.vm_binary.as_str()).chain(args)).privileged()
    }

    /// `vm image provision [-d <datastore>] <image> <instance>`
    pub fn provision(&self, id: &VmIdentity) -> RemoteCommand {
        let mut args = vec!["image", "provision"];
        if let Some(datastore) = &self.datastore {
            args.extend(["-d", datastore.as_str()]);
        }
        args.extend([id.image(), id.instance_name()]);
        self.vm(args)
    }

    /// `vm start <instance>`
    pub fn start(&self, id: &VmIdentity) -> RemoteCommand {
        self.vm(["start", id.instance_name()])
    }

    /// `vm info <instance>`, cut down to the state word of its fourth line
    /// (`  state: running (1234)` becomes `running`).
    pub fn status(&self, id: &VmIdentity) -> RemoteCommand {
        self.vm(["info", id.instance_name()])
            .pipe(["head", "-n", "4"])
            .pipe(["tail", "-n", "1"])
            .pipe(["cut", "-d", ":", "-f", "2"])
            .pipe(["cut", "-d", " ", "-f", "2"])
    }

    /// `yes | vm poweroff <instance>`
    pub fn poweroff(&self, id: &VmIdentity) -> RemoteCommand {
        self.vm(["poweroff", id.instance_name()]).confirmed()
    }

    /// `yes | vm destroy <instance>`
    pub fn destroy(&self, id: &VmIdentity) -> RemoteCommand {
        self.vm(["destroy", id.instance_name()]).confirmed()
    }
}
