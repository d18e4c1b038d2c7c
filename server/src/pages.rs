// The disallowed `.php` path doubles as a honeypot: nothing serves it, and
// any client that requests it anyway gets banned by the abuse guard.
pub const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\nDisallow: /form/posts.php";

pub fn form_page(base_path: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>kleister</title>
</head>
<body>
<form action="{base_path}/post" method="post" enctype="multipart/form-data">
<p><textarea name="text" rows="20" cols="80"></textarea></p>
<p><input type="file" name="file"></p>
<p><select name="expire">
<option value="600">10 minutes</option>
<option value="3600">1 hour</option>
<option value="86400" selected>1 day</option>
</select>
<input type="submit" value="Paste"></p>
</form>
</body>
</html>
"#
    )
}
