/// BSD sysexits(3) 退出码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SysExit {
    Ok = 0,
    /// 命令行用法错误
    Usage = 64,
    DataErr = 65,
    NoInput = 66,
    NoUser = 67,
    /// 无法连接到主机
    NoHost = 68,
    /// 服务不可用
    Unavailable = 69,
    /// 内部软件错误
    Software = 70,
    OsErr = 71,
    OsFile = 72,
    CantCreat = 73,
    IoErr = 74,
    TempFail = 75,
    /// 远端协议错误
    Protocol = 76,
    NoPerm = 77,
    /// 配置错误
    Config = 78,
}

impl SysExit {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<SysExit> for std::process::ExitCode {
    fn from(value: SysExit) -> Self {
        std::process::ExitCode::from(value.code())
    }
}
